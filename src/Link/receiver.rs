// src/Link/receiver.rs

use crate::Core::engine::{
    CloseMode, Engine, ReceiverHandler, ReceiverLink, ReceiverWork, WorkQueue,
};
use crate::Core::error::{ErrorCondition, LinkError, Result, TRANSFER_LIMIT_EXCEEDED};
use crate::Link::state::LinkState;
use crate::Link::Buffer::BoundedBuffer;
use crate::Link::Structs::Message;
use crate::Link::LinkBuilder;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A thread-safe receiving link that blocks receiving threads when there are
/// no messages available, and keeps a bounded buffer of incoming messages by
/// granting credit only when there is space in the buffer.
pub struct Receiver {
    shared: Arc<ReceiverShared>,
}

/// State shared between application threads and the engine thread.
pub(crate) struct ReceiverShared {
    pub(crate) address: String,
    pub(crate) state: Mutex<ReceiverState>,
    /// Signalled when a message arrives or the lifecycle changes.
    can_receive: Condvar,
    pub(crate) received: CachePadded<AtomicU64>,
}

pub(crate) struct ReceiverState {
    pub(crate) lifecycle: LinkState,
    queue: Option<Arc<dyn WorkQueue<ReceiverWork>>>,
    /// Messages not yet returned by `receive()`.
    pub(crate) buffer: BoundedBuffer<Message>,
    failure: Option<ErrorCondition>,
}

impl ReceiverState {
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
}

impl Receiver {
    /// Request a receiving link from `address` at `url` with default options.
    pub fn open(engine: &dyn Engine, url: &str, address: &str) -> Result<Self> {
        LinkBuilder::new(url, address).open_receiver(engine)
    }

    pub(crate) fn from_shared(shared: Arc<ReceiverShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &ReceiverShared {
        &self.shared
    }

    pub(crate) fn new_shared(address: &str, capacity: usize) -> Arc<ReceiverShared> {
        Arc::new(ReceiverShared {
            address: address.to_owned(),
            state: Mutex::new(ReceiverState {
                lifecycle: LinkState::Unopened,
                queue: None,
                buffer: BoundedBuffer::new(capacity),
                failure: None,
            }),
            can_receive: Condvar::new(),
            received: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Receives a message, blocking while none is buffered.
    ///
    /// # Arguments
    /// * `timeout` - `None` or zero waits indefinitely; otherwise the longest time to wait
    ///
    /// # Returns
    /// * `Ok(Some(message))` - the buffer head, in arrival order
    /// * `Ok(None)` - the timeout elapsed with nothing to receive
    /// * `Err(LinkError::Closed)` - the link was closed and everything buffered has been received
    /// * `Err(LinkError::Fatal)` - the engine reported a failure and everything buffered
    ///   before it has been received
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .and_then(|t| Instant::now().checked_add(t));

        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if let Some(message) = shared.take(&mut state) {
                return Ok(Some(message));
            }
            state.check()?;

            match deadline {
                None => shared.can_receive.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        debug!(address = %shared.address, "receive timed out");
                        return Ok(None);
                    }
                    let _ = shared.can_receive.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Receives a message, blocking until one is available or the link ends.
    pub fn receive_blocking(&self) -> Result<Message> {
        match self.receive(None)? {
            Some(message) => Ok(message),
            // receive(None) only returns once it has a message or an error
            None => Err(LinkError::Closed),
        }
    }

    /// Receives a message, waiting up to `timeout`.
    ///
    /// Unlike [`receive`](Self::receive), a zero `timeout` does not wait at
    /// all: `receive_timeout(Duration::ZERO)` behaves as
    /// [`try_receive`](Self::try_receive), while `receive(Some(Duration::ZERO))`
    /// waits indefinitely.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        if timeout.is_zero() {
            return self.try_receive();
        }
        self.receive(Some(timeout))
    }

    /// Receives a message if one is buffered, without blocking.
    pub fn try_receive(&self) -> Result<Option<Message>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if let Some(message) = shared.take(&mut state) {
            return Ok(Some(message));
        }
        state.check()?;
        Ok(None)
    }

    /// Closes the link and its connection.
    ///
    /// Does nothing if the link is not open yet. Otherwise schedules the close
    /// on the engine thread and wakes blocked receivers: they drain what is
    /// already buffered, then get `LinkError::Closed`. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.shutdown_link(CloseMode::Close)
    }

    /// Like [`close`](Self::close) but only detaches the link, leaving any
    /// durable subscription held under the link name in place.
    pub fn detach(&self) -> Result<()> {
        self.shutdown_link(CloseMode::Detach)
    }

    fn shutdown_link(&self, mode: CloseMode) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if let Some(condition) = &state.failure {
            return Err(LinkError::Fatal(condition.clone()));
        }
        let Some(queue) = state.queue.clone() else {
            debug!(address = %shared.address, "close before link open ignored");
            return Ok(());
        };
        if !state.lifecycle.is_usable() {
            return Ok(());
        }

        state.lifecycle = LinkState::Closing;
        shared.can_receive.notify_all();
        info!(address = %shared.address, ?mode, buffered = state.buffer.len(), "closing receiver");
        queue.add(Box::new(move |link: &mut dyn ReceiverLink| link.close(mode)))
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.lock().lifecycle
    }

    /// Messages buffered and not yet received.
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().buffer.capacity()
    }

    /// Messages returned to callers so far.
    pub fn received_count(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// The engine failure that ended this link, if any.
    pub fn failure(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().failure.clone()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let state = self.shared.state.lock();
        if state.lifecycle != LinkState::Open {
            return;
        }
        if let Some(queue) = &state.queue {
            let _ = queue.add(Box::new(|link: &mut dyn ReceiverLink| link.close(CloseMode::Close)));
        }
    }
}

impl ReceiverShared {
    /// Pop the buffer head and schedule one unit of credit for the space it frees.
    fn take(&self, state: &mut ReceiverState) -> Option<Message> {
        let message = state.buffer.pop()?;
        self.received.fetch_add(1, Ordering::Relaxed);

        if state.lifecycle == LinkState::Open {
            if let Some(queue) = &state.queue {
                let replenish: ReceiverWork = Box::new(|link: &mut dyn ReceiverLink| link.add_credit(1));
                if let Err(e) = queue.add(replenish) {
                    warn!(address = %self.address, error = %e, "could not replenish credit");
                }
            }
        }
        Some(message)
    }
}

// == engine thread only

impl ReceiverHandler for ReceiverShared {
    fn on_receiver_open(&self, link: &mut dyn ReceiverLink, queue: Arc<dyn WorkQueue<ReceiverWork>>) {
        let mut state = self.state.lock();
        state.queue = Some(queue);
        if state.lifecycle == LinkState::Unopened {
            state.lifecycle = LinkState::Open;
        }
        // Buffer is empty, initial credit is the limit
        let credit = u32::try_from(state.buffer.remaining()).unwrap_or(u32::MAX);
        link.add_credit(credit);
        info!(address = %self.address, credit, "receiver open");
        self.can_receive.notify_all();
    }

    fn on_message(&self, link: &mut dyn ReceiverLink, message: Message) {
        // The engine already took one unit of credit for this message
        let mut state = self.state.lock();
        if state.buffer.push(message).is_err() {
            let condition = ErrorCondition::new(
                TRANSFER_LIMIT_EXCEEDED,
                format!("delivery beyond buffer capacity {}", state.buffer.capacity()),
            );
            error!(address = %self.address, %condition, "receiver overrun");
            state.failure = Some(condition);
            state.lifecycle = LinkState::Closed;
            link.close(CloseMode::Close);
        }
        self.can_receive.notify_all();
    }

    fn on_error(&self, condition: &ErrorCondition) {
        error!(address = %self.address, %condition, "receiver link failed");
        let mut state = self.state.lock();
        state.failure = Some(condition.clone());
        state.lifecycle = LinkState::Closed;
        self.can_receive.notify_all();
    }

    fn on_close(&self) {
        let mut state = self.state.lock();
        debug!(address = %self.address, buffered = state.buffer.len(), "receiver closed");
        state.lifecycle = LinkState::Closed;
        self.can_receive.notify_all();
    }
}
