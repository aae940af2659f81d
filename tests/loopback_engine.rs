use credit_link::Core::{
    Engine, ErrorCondition, SenderHandler, SenderLink, SenderOptions, SenderWork, WorkQueue,
    TRANSFER_LIMIT_EXCEEDED,
};
use credit_link::{LinkState, LoopbackConfig, LoopbackEngine, Message, Receiver, Sender};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const URL: &str = "amqp://localhost";

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
#[serial]
fn senders_sharing_an_address_never_overfill_it() {
    let engine = LoopbackEngine::with_config(LoopbackConfig::new().with_address_capacity(2)).unwrap();
    let a = Arc::new(Sender::open(&engine, URL, "shared").unwrap());
    let b = Arc::new(Sender::open(&engine, URL, "shared").unwrap());
    engine.sync().unwrap();

    // The address's free capacity is split, never handed out twice
    assert_eq!(a.credit() + b.credit(), 2);

    let handles: Vec<_> = [("a", Arc::clone(&a)), ("b", Arc::clone(&b))]
        .into_iter()
        .map(|(tag, sender)| thread::spawn(move || sender.send_all((0..2).map(|i| format!("{tag}{i}")))))
        .collect();

    wait_for("two admitted sends", || a.sent_count() + b.sent_count() == 2);
    wait_for("the rest to block", || a.waiting() + b.waiting() >= 1);
    thread::sleep(Duration::from_millis(50));
    engine.sync().unwrap();
    assert_eq!(engine.depth("shared").unwrap(), 2);
    assert_eq!(a.sent_count() + b.sent_count(), 2);
    assert_eq!(a.credit() + b.credit(), 0);

    let receiver = Receiver::open(&engine, URL, "shared").unwrap();
    let mut bodies = Vec::new();
    for _ in 0..4 {
        let message = receiver.receive_timeout(Duration::from_secs(5)).unwrap().unwrap();
        bodies.push(message.body_str().into_owned());
        assert!(engine.depth("shared").unwrap() <= 2);
    }
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    bodies.sort();
    assert_eq!(bodies, ["a0", "a1", "b0", "b1"]);
    assert!(a.failure().is_none() && b.failure().is_none());
}

/// A raw engine client that transmits whatever it is told to, credit or not.
#[derive(Default)]
struct RawSender {
    queue: Mutex<Option<Arc<dyn WorkQueue<SenderWork>>>>,
    failure: Mutex<Option<ErrorCondition>>,
}

impl SenderHandler for RawSender {
    fn on_sender_open(&self, _link: &mut dyn SenderLink, queue: Arc<dyn WorkQueue<SenderWork>>) {
        *self.queue.lock() = Some(queue);
    }

    fn on_sendable(&self, _link: &mut dyn SenderLink) {}

    fn on_error(&self, condition: &ErrorCondition) {
        *self.failure.lock() = Some(condition.clone());
    }
}

#[test]
fn transfer_without_credit_fails_the_link() {
    let engine = LoopbackEngine::with_config(LoopbackConfig::new().with_address_capacity(1)).unwrap();
    let raw = Arc::new(RawSender::default());
    engine
        .open_sender(URL, "strict", SenderOptions::default(), raw.clone())
        .unwrap();
    engine.sync().unwrap();

    let queue = raw.queue.lock().clone().expect("link open");
    queue
        .add(Box::new(|link: &mut dyn SenderLink| {
            assert_eq!(link.credit(), 1);
            link.send(Message::from("within credit"));
            link.send(Message::from("beyond credit"));
        }))
        .unwrap();
    engine.sync().unwrap();

    let failure = raw.failure.lock().clone().expect("link failed");
    assert_eq!(failure.name, TRANSFER_LIMIT_EXCEEDED);
    assert_eq!(engine.depth("strict").unwrap(), 1);
}

#[test]
fn durable_receiver_detaches_cleanly() {
    let engine = LoopbackEngine::new().unwrap();
    let receiver = credit_link::LinkBuilder::new(URL, "subs")
        .with_name("sub-1")
        .with_durable(true)
        .open_receiver(&engine)
        .unwrap();
    engine.sync().unwrap();
    assert_eq!(receiver.state(), LinkState::Open);

    receiver.detach().unwrap();
    engine.sync().unwrap();
    assert_eq!(receiver.state(), LinkState::Closed);
    assert!(receiver.failure().is_none());
}
