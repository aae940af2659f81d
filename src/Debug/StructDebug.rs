use std::fmt;
use crate::Core::LoopbackEngine;
use crate::Link::{BoundedBuffer, ReceiverShared, SenderShared};

/// Debug function for Sender
///
/// Shows:
/// - Address
/// - Lifecycle state
/// - Credit and queued count
/// - Threads waiting for credit
pub(crate) fn debug_sender(shared: &SenderShared, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = shared.state.lock();
    f.debug_struct("Sender")
        .field("address", &shared.address)
        .field("state", &state.lifecycle)
        .field("credit", &state.credit)
        .field("queued", &state.queued)
        .field("waiting", &state.waiting)
        .finish_non_exhaustive()
}

/// Debug function for Receiver
///
/// Shows the address, lifecycle state and buffer fill level
pub(crate) fn debug_receiver(shared: &ReceiverShared, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = shared.state.lock();
    f.debug_struct("Receiver")
        .field("address", &shared.address)
        .field("state", &state.lifecycle)
        .field("buffered", &format_args!("{}/{}", state.buffer.len(), state.buffer.capacity()))
        .finish_non_exhaustive()
}

/// Debug function for BoundedBuffer
///
/// Prints the fill level without requiring `T: Debug`
pub(crate) fn debug_bounded_buffer<T>(buffer: &BoundedBuffer<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BoundedBuffer")
        .field("len", &buffer.len())
        .field("capacity", &buffer.capacity())
        .finish()
}

/// Debug function for LoopbackEngine
pub(crate) fn debug_loopback_engine(engine: &LoopbackEngine, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoopbackEngine")
        .field("config", engine.config())
        .finish_non_exhaustive()
}
