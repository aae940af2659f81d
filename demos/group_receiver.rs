// Receives one message group from an address fed with several interleaved
// groups. Stops at the end of the group or on Ctrl+C.
//
// Usage: group_receiver [CONNECTION-URL] [ADDRESS] [GROUP]
use credit_link::{LinkBuilder, LinkError, LoopbackEngine, Message, Sender};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const GROUPS: [&str; 3] = ["red", "green", "blue"];
const GROUP_SIZE: u32 = 20;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 4 {
        eprintln!("Usage: {} [CONNECTION-URL] [ADDRESS] [GROUP]", args[0]);
        std::process::exit(1);
    }
    let url = args.get(1).cloned().unwrap_or_else(|| "amqp://127.0.0.1".to_owned());
    let address = args.get(2).cloned().unwrap_or_else(|| "groupAddress".to_owned());
    let group = args.get(3).cloned().unwrap_or_else(|| "red".to_owned());

    let engine = LoopbackEngine::new()?;
    let receiver = Arc::new(
        LinkBuilder::new(url.as_str(), address.as_str())
            .with_name(format!("group-receiver-{}", group))
            .with_group_filter(group.as_str())
            .open_receiver(&engine)?,
    );

    // Handle Ctrl+C by closing the receiver, which wakes the receive loop
    let for_handler = Arc::clone(&receiver);
    ctrlc::set_handler(move || {
        let _ = for_handler.close();
    })
    .expect("Error setting Ctrl+C handler");

    let feeder = {
        let sender = Sender::open(&engine, &url, &address)?;
        thread::spawn(move || -> Result<(), LinkError> {
            for seq in 0..GROUP_SIZE {
                for g in GROUPS {
                    let body = format!("{} message {}", g, seq);
                    let message = if seq + 1 == GROUP_SIZE {
                        Message::from(body).with_group_end(g)
                    } else {
                        Message::from(body).with_group(g, seq)
                    };
                    sender.send(message)?;
                }
                thread::sleep(Duration::from_millis(fastrand::u64(0..10)));
            }
            sender.close()
        })
    };

    println!("Receiving group {:?} from {} at {}", group, address, url);
    let mut received = 0;
    loop {
        match receiver.receive_blocking() {
            Ok(message) => {
                received += 1;
                println!("Received: {}", message.body_str());
                if message.is_group_end() {
                    println!("End of group {:?} after {} messages", group, received);
                    receiver.close()?;
                    break;
                }
            }
            Err(LinkError::Closed) => {
                println!("Receiver closed after {} messages", received);
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Ok(Err(e)) = feeder.join() {
        eprintln!("Feeder stopped: {}", e);
    }
    engine.shutdown();
    Ok(())
}

