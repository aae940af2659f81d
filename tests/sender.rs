use credit_link::{ErrorCondition, LinkError, LinkState, LoopbackConfig, LoopbackEngine, Receiver, Sender};
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const URL: &str = "amqp://127.0.0.1:5672";

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// An engine whose addresses grant senders no credit until raised.
fn starved_engine() -> LoopbackEngine {
    LoopbackEngine::with_config(LoopbackConfig::new().with_address_capacity(0)).unwrap()
}

#[test]
#[serial]
fn send_blocks_until_credit_is_granted() {
    let engine = starved_engine();
    let sender = Arc::new(Sender::open(&engine, URL, "gated").unwrap());
    engine.sync().unwrap();
    assert_eq!(sender.state(), LinkState::Open);
    assert_eq!(sender.credit(), 0);

    let blocked = Arc::clone(&sender);
    let handle = thread::spawn(move || blocked.send("x"));
    wait_for("sender to block", || sender.waiting() == 1);
    assert_eq!(sender.queued(), 0);
    assert_eq!(engine.depth("gated").unwrap(), 0);

    engine.set_address_capacity("gated", 1).unwrap();
    handle.join().unwrap().unwrap();
    engine.sync().unwrap();

    assert_eq!(sender.waiting(), 0);
    assert_eq!(sender.queued(), 0);
    assert_eq!(sender.sent_count(), 1);
    assert_eq!(sender.credit(), 0);
    assert_eq!(engine.depth("gated").unwrap(), 1);
}

#[test]
#[serial]
fn blocked_senders_are_admitted_in_arrival_order() {
    let engine = starved_engine();
    let sender = Arc::new(Sender::open(&engine, URL, "fifo").unwrap());
    engine.sync().unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        let blocked = Arc::clone(&sender);
        handles.push(thread::spawn(move || blocked.send(format!("m{i}"))));
        wait_for("sender to queue up", || sender.waiting() == i + 1);
    }

    let receiver = Receiver::open(&engine, URL, "fifo").unwrap();
    engine.set_address_capacity("fifo", 3).unwrap();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    for expected in ["m0", "m1", "m2"] {
        let message = receiver.receive_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(message.body_str(), expected);
    }
}

#[test]
#[serial]
fn concurrent_send_all_keeps_per_thread_order() {
    // Vary how much backpressure the senders see
    let capacity = fastrand::usize(1..=16);
    let engine = LoopbackEngine::with_config(LoopbackConfig::new().with_address_capacity(capacity)).unwrap();
    let receiver = credit_link::LinkBuilder::new(URL, "fan-in")
        .with_buffer_capacity(8)
        .open_receiver(&engine)
        .unwrap();
    let sender = Arc::new(Sender::open(&engine, URL, "fan-in").unwrap());

    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let sender = Arc::clone(&sender);
            thread::spawn(move || sender.send_all((0..PER_THREAD).map(|i| format!("{t}-{i}"))))
        })
        .collect();

    let mut last: HashMap<usize, usize> = HashMap::new();
    let mut last_id = 0;
    for _ in 0..THREADS * PER_THREAD {
        let message = receiver
            .receive(Some(Duration::from_secs(5)))
            .unwrap()
            .expect("message within timeout");
        let body = message.body_str();
        let (t, i) = body.split_once('-').unwrap();
        let (t, i): (usize, usize) = (t.parse().unwrap(), i.parse().unwrap());
        if let Some(prev) = last.insert(t, i) {
            assert!(i > prev, "thread {t} reordered: {prev} then {i}");
        }
        assert!(message.meta.message_id > last_id, "message ids out of order");
        last_id = message.meta.message_id;
    }

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(sender.sent_count(), (THREADS * PER_THREAD) as u64);
    assert!(receiver.try_receive().unwrap().is_none());
}

#[test]
#[serial]
fn close_wakes_blocked_senders() {
    let engine = starved_engine();
    let sender = Arc::new(Sender::open(&engine, URL, "closing").unwrap());
    engine.sync().unwrap();

    let blocked = Arc::clone(&sender);
    let handle = thread::spawn(move || blocked.send("never"));
    wait_for("sender to block", || sender.waiting() == 1);

    sender.close().unwrap();
    assert!(matches!(handle.join().unwrap(), Err(LinkError::Closed)));
    assert!(matches!(sender.send("late"), Err(LinkError::Closed)));

    engine.sync().unwrap();
    assert_eq!(sender.state(), LinkState::Closed);
    assert_eq!(sender.sent_count(), 0);
    sender.close().unwrap();
}

#[test]
#[serial]
fn engine_failure_wakes_blocked_senders() {
    let engine = starved_engine();
    let sender = Arc::new(Sender::open(&engine, URL, "failing").unwrap());
    engine.sync().unwrap();

    let blocked = Arc::clone(&sender);
    let handle = thread::spawn(move || blocked.send("never"));
    wait_for("sender to block", || sender.waiting() == 1);

    let condition = ErrorCondition::new("amqp:resource-limit-exceeded", "");
    engine.inject_error("failing", condition.clone()).unwrap();

    match handle.join().unwrap() {
        Err(LinkError::Fatal(got)) => assert_eq!(got, condition),
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert_eq!(sender.failure(), Some(condition));
    assert!(matches!(sender.close(), Err(LinkError::Fatal(_))));
}

#[test]
#[serial]
fn detach_closes_the_link() {
    let engine = LoopbackEngine::new().unwrap();
    let sender = Sender::open(&engine, URL, "detached").unwrap();
    sender.send("before").unwrap();
    sender.detach().unwrap();
    engine.sync().unwrap();

    assert_eq!(sender.state(), LinkState::Closed);
    // Admitted before the detach, so still transmitted
    assert_eq!(sender.sent_count(), 1);
    assert_eq!(engine.depth("detached").unwrap(), 1);
}

#[test]
fn rejects_bad_url() {
    let engine = LoopbackEngine::new().unwrap();
    let err = Sender::open(&engine, "::", "q").unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn debug_shows_credit_state() {
    let engine = starved_engine();
    let sender = Sender::open(&engine, URL, "dbg").unwrap();
    engine.sync().unwrap();

    let out = format!("{sender:?}");
    assert!(out.contains("Sender"), "{out}");
    assert!(out.contains("credit: 0"), "{out}");
    assert!(out.contains("Open"), "{out}");
}
