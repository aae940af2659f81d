// In src/Link/sender.rs
use crate::Core::engine::{CloseMode, Engine, SenderHandler, SenderLink, SenderWork, WorkQueue};
use crate::Core::error::{ErrorCondition, LinkError, Result};
use crate::Link::state::LinkState;
use crate::Link::Structs::Message;
use crate::Link::LinkBuilder;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace};

/// A thread-safe sending link that blocks sending threads while the engine
/// has granted no credit for more messages.
///
/// Any number of threads may call [`send`](Self::send) concurrently. A send is
/// admitted only while the number of admitted-but-untransmitted messages is
/// below the link credit; admitted messages are handed to the engine thread
/// in admission order, and blocked senders are admitted in the order they
/// started waiting.
pub struct Sender {
    shared: Arc<SenderShared>,
}

/// State shared between application threads and the engine thread.
pub(crate) struct SenderShared {
    pub(crate) address: String,
    pub(crate) state: Mutex<SenderState>,
    /// Signalled when credit, queued count, dispatcher or lifecycle change.
    sender_ready: Condvar,
    pub(crate) sent: CachePadded<AtomicU64>,
}

pub(crate) struct SenderState {
    pub(crate) lifecycle: LinkState,
    queue: Option<Arc<dyn WorkQueue<SenderWork>>>,
    /// Credit last reported by the engine.
    pub(crate) credit: u32,
    /// Admitted messages not yet transmitted by the engine thread.
    pub(crate) queued: u32,
    /// Admission tickets; a waiter is admitted only when `serving` reaches its ticket.
    next_ticket: u64,
    serving: u64,
    pub(crate) waiting: usize,
    next_message_id: u64,
    failure: Option<ErrorCondition>,
}

impl SenderState {
    fn check(&self) -> Result<()> {
        if let Some(condition) = &self.failure {
            return Err(LinkError::Fatal(condition.clone()));
        }
        if self.lifecycle.is_usable() {
            Ok(())
        } else {
            Err(LinkError::Closed)
        }
    }

    fn can_admit(&self, ticket: u64) -> bool {
        self.queue.is_some() && self.serving == ticket && self.queued < self.credit
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

impl Sender {
    /// Request a sending link to `address` at `url` with default options.
    pub fn open(engine: &dyn Engine, url: &str, address: &str) -> Result<Self> {
        LinkBuilder::new(url, address).open_sender(engine)
    }

    pub(crate) fn from_shared(shared: Arc<SenderShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &SenderShared {
        &self.shared
    }

    pub(crate) fn new_shared(address: &str) -> Arc<SenderShared> {
        Arc::new(SenderShared {
            address: address.to_owned(),
            state: Mutex::new(SenderState {
                lifecycle: LinkState::Unopened,
                queue: None,
                credit: 0,
                queued: 0,
                next_ticket: 0,
                serving: 0,
                waiting: 0,
                next_message_id: 0,
                failure: None,
            }),
            sender_ready: Condvar::new(),
            sent: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Sends a message, blocking while the link has no credit for it.
    ///
    /// Returns once the message is admitted and scheduled on the engine
    /// thread; transmission happens asynchronously. The sender stamps
    /// `message_id` and `timestamp_ns` on admission.
    ///
    /// # Returns
    /// * `Ok(())` once admitted
    /// * `Err(LinkError::Closed)` if the link is closing or closed
    /// * `Err(LinkError::Fatal)` if the engine reported a failure
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        let mut message = message.into();
        let shared = &self.shared;
        let mut state = shared.state.lock();

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting += 1;
        let admitted = loop {
            if let Err(e) = state.check() {
                break Err(e);
            }
            if state.can_admit(ticket) {
                break Ok(());
            }
            trace!(address = %shared.address, ticket, credit = state.credit, queued = state.queued, "sender waiting for credit");
            shared.sender_ready.wait(&mut state);
        };
        state.waiting -= 1;
        // Check failures are terminal, so an abandoned ticket never holds back a later admission.
        admitted?;

        let queue = match &state.queue {
            Some(queue) => Arc::clone(queue),
            None => return Err(LinkError::Closed),
        };
        state.serving += 1;
        state.queued += 1;
        state.next_message_id += 1;
        message.meta.message_id = state.next_message_id;
        message.meta.timestamp_ns = now_ns();
        shared.sender_ready.notify_all();

        // Scheduled under the lock so engine order matches admission order.
        let engine_side = Arc::clone(shared);
        let work: SenderWork = Box::new(move |link: &mut dyn SenderLink| engine_side.do_send(link, message));
        if let Err(e) = queue.add(work) {
            state.queued -= 1;
            state.lifecycle = LinkState::Closed;
            shared.sender_ready.notify_all();
            return Err(e);
        }
        Ok(())
    }

    /// Sends each message in order.
    ///
    /// The batch is not atomic: the lock is released between messages, so
    /// sends from other threads may interleave with it. Stops at the first
    /// error.
    pub fn send_all<I>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        for message in messages {
            self.send(message)?;
        }
        Ok(())
    }

    /// Closes the link and its connection.
    ///
    /// Blocks until the link is open, then schedules the close on the engine
    /// thread behind any already admitted messages. Threads blocked in
    /// [`send`](Self::send) are woken with `LinkError::Closed`. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.shutdown_link(CloseMode::Close)
    }

    /// Like [`close`](Self::close) but only detaches the link.
    pub fn detach(&self) -> Result<()> {
        self.shutdown_link(CloseMode::Detach)
    }

    fn shutdown_link(&self, mode: CloseMode) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        // Wait till the dispatcher is known
        let queue = loop {
            if let Some(condition) = &state.failure {
                return Err(LinkError::Fatal(condition.clone()));
            }
            if !state.lifecycle.is_usable() {
                return Ok(());
            }
            if let Some(queue) = &state.queue {
                break Arc::clone(queue);
            }
            shared.sender_ready.wait(&mut state);
        };

        state.lifecycle = LinkState::Closing;
        shared.sender_ready.notify_all();
        info!(address = %shared.address, ?mode, queued = state.queued, "closing sender");
        queue.add(Box::new(move |link: &mut dyn SenderLink| link.close(mode)))
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.lock().lifecycle
    }

    /// Credit last reported by the engine.
    pub fn credit(&self) -> u32 {
        self.shared.state.lock().credit
    }

    /// Admitted messages the engine thread has not transmitted yet.
    pub fn queued(&self) -> u32 {
        self.shared.state.lock().queued
    }

    /// Threads currently blocked in [`send`](Self::send).
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiting
    }

    /// Messages transmitted by the engine thread so far.
    pub fn sent_count(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// The engine failure that ended this link, if any.
    pub fn failure(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().failure.clone()
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        let state = self.shared.state.lock();
        if state.lifecycle != LinkState::Open {
            return;
        }
        if let Some(queue) = &state.queue {
            let _ = queue.add(Box::new(|link: &mut dyn SenderLink| link.close(CloseMode::Close)));
        }
    }
}

// == engine thread only

impl SenderShared {
    /// Runs on the engine thread because it was scheduled by `send()`.
    fn do_send(&self, link: &mut dyn SenderLink, message: Message) {
        link.send(message);
        self.sent.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.queued = state.queued.saturating_sub(1);
        state.credit = link.credit();
        self.sender_ready.notify_all();
    }
}

impl SenderHandler for SenderShared {
    fn on_sender_open(&self, link: &mut dyn SenderLink, queue: Arc<dyn WorkQueue<SenderWork>>) {
        let mut state = self.state.lock();
        state.queue = Some(queue);
        state.credit = link.credit();
        if state.lifecycle == LinkState::Unopened {
            state.lifecycle = LinkState::Open;
        }
        info!(address = %self.address, credit = state.credit, "sender open");
        self.sender_ready.notify_all();
    }

    fn on_sendable(&self, link: &mut dyn SenderLink) {
        let mut state = self.state.lock();
        state.credit = link.credit();
        debug!(address = %self.address, credit = state.credit, queued = state.queued, "sendable");
        self.sender_ready.notify_all();
    }

    fn on_error(&self, condition: &ErrorCondition) {
        error!(address = %self.address, %condition, "sender link failed");
        let mut state = self.state.lock();
        state.failure = Some(condition.clone());
        state.lifecycle = LinkState::Closed;
        self.sender_ready.notify_all();
    }

    fn on_close(&self) {
        let mut state = self.state.lock();
        debug!(address = %self.address, "sender closed");
        state.lifecycle = LinkState::Closed;
        self.sender_ready.notify_all();
    }
}
