// Message types carried across the application/engine boundary

/// Group sequence value marking the last message of a group.
pub const GROUP_SEQUENCE_END: u32 = u32::MAX;

/// Metadata that travels alongside each payload.
///
/// `message_id` and `timestamp_ns` are stamped by the [`Sender`](crate::Link::Sender)
/// when the message is admitted; group fields are set by the application.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageMeta {
    pub message_id: u64,
    pub timestamp_ns: u64,
    pub subject: Option<String>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
}

/// A discrete message: opaque payload plus metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub meta: MessageMeta,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            meta: MessageMeta::default(),
            body: body.into(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.meta.subject = Some(subject.into());
        self
    }

    /// Tags the message as member `sequence` of group `group_id`.
    pub fn with_group(mut self, group_id: impl Into<String>, sequence: u32) -> Self {
        self.meta.group_id = Some(group_id.into());
        self.meta.group_sequence = Some(sequence);
        self
    }

    /// Tags the message as the terminal member of group `group_id`.
    pub fn with_group_end(self, group_id: impl Into<String>) -> Self {
        self.with_group(group_id, GROUP_SEQUENCE_END)
    }

    pub fn group_id(&self) -> Option<&str> {
        self.meta.group_id.as_deref()
    }

    pub fn is_group_end(&self) -> bool {
        self.meta.group_sequence == Some(GROUP_SEQUENCE_END)
    }

    /// Lossy UTF-8 view of the payload.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Message::new(body.as_bytes())
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Message::new(body.into_bytes())
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Message::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_end_marker() {
        let m = Message::from("last").with_group_end("A");
        assert_eq!(m.group_id(), Some("A"));
        assert!(m.is_group_end());

        let m = Message::from("first").with_group("A", 0);
        assert!(!m.is_group_end());
        assert_eq!(m.body_str(), "first");
    }
}
