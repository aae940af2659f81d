use credit_link::{LinkBuilder, LinkError, LoopbackEngine, Sender};
use std::env;
use std::sync::Arc;
use std::thread;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let address = args.get(1).cloned().unwrap_or_else(|| "examples".to_owned());
    let count: usize = args.get(2).and_then(|n| n.parse().ok()).unwrap_or(10);
    let url = "amqp://localhost";

    println!("Blocking Consumer: Subscribing to {}", address);

    let engine = LoopbackEngine::new()?;
    let receiver = Arc::new(
        LinkBuilder::new(url, address.as_str())
            .with_name("blocking-consumer")
            .with_buffer_capacity(8)
            .open_receiver(&engine)?,
    );

    let for_handler = Arc::clone(&receiver);
    ctrlc::set_handler(move || {
        let _ = for_handler.close();
    })
    .expect("Error setting Ctrl+C handler");

    let sender = Sender::open(&engine, url, &address)?;
    let producer = thread::spawn(move || -> Result<(), LinkError> {
        sender.send_all((0..count).map(|i| format!("message {}", i)))?;
        sender.close()
    });

    println!("Blocking Consumer: Waiting for messages...");

    let mut received = 0;
    while received < count {
        match receiver.receive_blocking() {
            Ok(message) => {
                received += 1;
                println!("Received: {}", message.body_str());
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    // Detach rather than close so a broker keeps the named subscription
    receiver.detach()?;
    if let Ok(Err(e)) = producer.join() {
        eprintln!("Producer stopped: {}", e);
    }
    println!("Blocking Consumer: received {} of {} messages", received, count);
    Ok(())
}
