use std::fmt;
use std::io;

/// Condition for a transfer beyond the credit a link was granted.
pub const TRANSFER_LIMIT_EXCEEDED: &str = "amqp:link:transfer-limit-exceeded";

/// An error condition reported by the protocol engine.
///
/// Mirrors the AMQP `error-condition`: a symbolic name such as
/// `amqp:connection:forced` plus a human readable description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    pub name: String,
    pub description: String,
}

impl ErrorCondition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.description)
        }
    }
}

/// Errors surfaced to application threads by senders, receivers and engines.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The engine reported an unrecoverable transport or protocol failure.
    #[error("fatal link error: {0}")]
    Fatal(ErrorCondition),
    /// The link was closed or detached by the application or the engine.
    #[error("link is closed")]
    Closed,
    /// The engine thread has stopped and no longer accepts work.
    #[error("protocol engine has shut down")]
    EngineShutdown,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

impl From<LinkError> for io::Error {
    fn from(err: LinkError) -> Self {
        let kind = match &err {
            LinkError::Io(inner) => inner.kind(),
            LinkError::Closed => io::ErrorKind::NotConnected,
            LinkError::EngineShutdown => io::ErrorKind::BrokenPipe,
            LinkError::Fatal(_) => io::ErrorKind::ConnectionAborted,
            LinkError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_display_omits_empty_description() {
        let bare = ErrorCondition::new("amqp:internal-error", "");
        assert_eq!(bare.to_string(), "amqp:internal-error");

        let full = ErrorCondition::new("amqp:connection:forced", "broker restart");
        assert_eq!(full.to_string(), "amqp:connection:forced: broker restart");
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: io::Error = LinkError::Closed.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let err: io::Error = LinkError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
