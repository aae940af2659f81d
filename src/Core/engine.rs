// The protocol engine seam: what senders and receivers require from the engine

use std::sync::Arc;

use super::error::{ErrorCondition, Result};
use crate::Link::Structs::Message;

/// Deferred work for a sending link, executed on the engine thread.
pub type SenderWork = Box<dyn FnOnce(&mut dyn SenderLink) + Send>;

/// Deferred work for a receiving link, executed on the engine thread.
pub type ReceiverWork = Box<dyn FnOnce(&mut dyn ReceiverLink) + Send>;

/// How a link is taken down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Close the link and its connection.
    Close,
    /// Detach the link only. Engines keep any durable subscription state
    /// associated with the link name.
    Detach,
}

/// Options for a sending link.
#[derive(Clone, Debug, Default)]
pub struct SenderOptions {
    /// Stable link name. Engines generate one when unset.
    pub name: Option<String>,
}

/// Options for a receiving link.
#[derive(Clone, Debug, Default)]
pub struct ReceiverOptions {
    /// Stable link name. Engines generate one when unset.
    pub name: Option<String>,
    /// Credit the engine tops the link up to automatically.
    /// `0` disables automatic flow control; the handler grants credit itself.
    pub credit_window: u32,
    /// Only deliver messages whose group id equals this value.
    pub group_filter: Option<String>,
    /// Request a durable subscription: terminus durability "unsettled
    /// state" and expiry policy "never". Meaningful together with `name`.
    pub durable: bool,
}

/// Scheduler bound to the engine thread.
///
/// Work added from any thread runs on the engine thread, in the order it
/// was added, interleaved with link callbacks.
pub trait WorkQueue<W>: Send + Sync {
    /// Schedule `work`.
    /// Fails with [`LinkError::EngineShutdown`](super::LinkError::EngineShutdown)
    /// once the engine no longer runs work.
    fn add(&self, work: W) -> Result<()>;
}

/// Engine-side handle to a sending link. Only valid on the engine thread.
pub trait SenderLink {
    fn address(&self) -> &str;

    /// Credit currently granted by the peer.
    fn credit(&self) -> u32;

    /// Transmit `message`. The engine consumes one unit of credit.
    /// Sending with no credit left is a protocol violation; engines fail
    /// the link with [`TRANSFER_LIMIT_EXCEEDED`](super::TRANSFER_LIMIT_EXCEEDED).
    fn send(&mut self, message: Message);

    fn close(&mut self, mode: CloseMode);
}

/// Engine-side handle to a receiving link. Only valid on the engine thread.
pub trait ReceiverLink {
    fn address(&self) -> &str;

    /// Credit currently granted to the peer and not yet used.
    fn credit(&self) -> u32;

    fn add_credit(&mut self, credit: u32);

    fn close(&mut self, mode: CloseMode);
}

/// Callbacks for a sending link, invoked on the engine thread.
pub trait SenderHandler: Send + Sync {
    /// The link is established. `queue` schedules work against this link.
    fn on_sender_open(&self, link: &mut dyn SenderLink, queue: Arc<dyn WorkQueue<SenderWork>>);

    /// The peer granted more credit.
    fn on_sendable(&self, link: &mut dyn SenderLink);

    /// Irrecoverable transport or protocol failure. No further callbacks follow.
    fn on_error(&self, condition: &ErrorCondition);

    /// The link and connection are closed. No further callbacks follow.
    fn on_close(&self) {}
}

/// Callbacks for a receiving link, invoked on the engine thread.
pub trait ReceiverHandler: Send + Sync {
    /// The link is established. `queue` schedules work against this link.
    fn on_receiver_open(&self, link: &mut dyn ReceiverLink, queue: Arc<dyn WorkQueue<ReceiverWork>>);

    /// A message arrived. The engine has already taken one unit of link credit.
    fn on_message(&self, link: &mut dyn ReceiverLink, message: Message);

    /// Irrecoverable transport or protocol failure. No further callbacks follow.
    fn on_error(&self, condition: &ErrorCondition);

    /// The link and connection are closed. No further callbacks follow.
    fn on_close(&self) {}
}

/// A single-threaded protocol engine.
///
/// `open_*` only requests the link; establishment is reported later
/// through the handler on the engine thread.
pub trait Engine: Send + Sync {
    fn open_sender(
        &self,
        url: &str,
        address: &str,
        options: SenderOptions,
        handler: Arc<dyn SenderHandler>,
    ) -> Result<()>;

    fn open_receiver(
        &self,
        url: &str,
        address: &str,
        options: ReceiverOptions,
        handler: Arc<dyn ReceiverHandler>,
    ) -> Result<()>;
}
