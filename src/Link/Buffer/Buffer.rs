// This is the receive-side buffer shared between the engine thread and receiving threads

use std::collections::VecDeque;

/// Default number of undelivered messages a receiver may hold.
/// This is also the initial credit a receiver grants its link.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// A fixed-capacity FIFO of undelivered items.
///
/// This struct carries no synchronization of its own; the owning
/// [`Receiver`](crate::Link::Receiver) keeps it behind its mutex.
///
/// ### Invariants:
/// - `len() <= capacity()` at all times; a push into a full buffer is refused
///   and hands the item back.
/// - Items are popped in the order they were pushed.
pub struct BoundedBuffer<T> {
    /// Buffered items, head first.
    pub(crate) items: VecDeque<T>,

    /// Maximum number of items, fixed at construction.
    pub(crate) capacity: usize,
}
