use std::fmt;

/// Lifecycle of a [`Sender`](super::Sender) or [`Receiver`](super::Receiver).
///
/// ```text
/// Unopened ──open──▶ Open ──close()──▶ Closing ──engine close──▶ Closed
///     └──────────────────┴── engine error / close ─────────────────▲
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Requested from the engine, not yet established.
    Unopened,
    Open,
    /// `close()` or `detach()` was called; the engine has not confirmed yet.
    Closing,
    Closed,
}

impl LinkState {
    /// Whether new sends and receives are still accepted.
    pub fn is_usable(self) -> bool {
        matches!(self, LinkState::Unopened | LinkState::Open)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Unopened => "unopened",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}
