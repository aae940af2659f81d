// Sends groups of checksummed messages and receives each group on its own
// filtered receiver.
//
// Usage: group_sender [CONNECTION-URL] [ADDRESS] [GROUPS] [COUNT]
//   GROUPS is a comma separated list, e.g. "red,green"
use credit_link::{LinkBuilder, LoopbackEngine, Message, Sender};
use sha2::{Digest, Sha256};
use std::env;
use std::thread;
use std::time::Instant;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let url = args.get(1).map(String::as_str).unwrap_or("amqp://127.0.0.1");
    let address = args.get(2).map(String::as_str).unwrap_or("groupAddress");
    let groups: Vec<String> = args
        .get(3)
        .map(String::as_str)
        .unwrap_or("red,green")
        .split(',')
        .map(str::to_owned)
        .collect();
    let count: u32 = match args.get(4) {
        Some(n) => n.parse().expect("Invalid message count"),
        None => 10,
    };

    let engine = LoopbackEngine::new()?;

    // One receiver per group; each only sees its own group
    let mut readers = Vec::new();
    for group in &groups {
        let receiver = LinkBuilder::new(url, address)
            .with_group_filter(group.as_str())
            .with_buffer_capacity(4)
            .open_receiver(&engine)?;
        let group = group.clone();
        readers.push(thread::spawn(move || -> std::io::Result<u32> {
            let mut received = 0;
            loop {
                let message = receiver.receive_blocking()?;
                received += 1;
                let digest = format!("{:x}", Sha256::digest(&message.body));
                println!(
                    "[{}] #{} {} sha256={}",
                    group,
                    message.meta.message_id,
                    message.body_str(),
                    &digest[..16]
                );
                if message.is_group_end() {
                    receiver.close()?;
                    return Ok(received);
                }
            }
        }));
    }

    let sender = Sender::open(&engine, url, address)?;
    println!("Sender: sending {} messages to each of {:?}", count, groups);

    let start = Instant::now();
    for seq in 0..count {
        for group in &groups {
            let body = format!("{}-{}", group, seq);
            let message = if seq + 1 == count {
                Message::from(body).with_group_end(group.as_str())
            } else {
                Message::from(body).with_group(group.as_str(), seq)
            };
            sender.send(message)?;
        }
    }
    sender.close()?;

    for (group, reader) in groups.iter().zip(readers) {
        match reader.join() {
            Ok(Ok(n)) => println!("Group {}: received {} messages", group, n),
            Ok(Err(e)) => eprintln!("Group {}: receiver failed: {}", group, e),
            Err(_) => eprintln!("Group {}: receiver panicked", group),
        }
    }
    println!("Sent {} messages in {:.2?}", sender.sent_count(), start.elapsed());

    engine.sync()?;
    engine.shutdown();
    Ok(())
}
