//! Chat message types.
//!
//! A [`NewMessage`] is built by the router at receipt time; the store
//! assigns it a [`MessageId`] and it becomes an immutable [`ChatMessage`].

use crate::identity::Identity;
use parlor_protocol::MessagePayload;

/// Store-assigned message sequence number. Strictly increasing in
/// insertion order.
pub type MessageId = i64;

/// Format used for message timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted as a message timestamp.
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Normalize a submitted recipient.
///
/// Absent, empty and whitespace-only recipients all mean broadcast.
#[must_use]
pub fn normalize_recipient(recipient: Option<&str>) -> Option<Identity> {
    recipient.and_then(Identity::parse)
}

/// A message that has been validated but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Author.
    pub sender: Identity,
    /// Direct recipient, `None` for broadcast.
    pub recipient: Option<Identity>,
    /// Trimmed, non-empty body.
    pub body: String,
    /// Receipt time.
    pub timestamp: String,
}

impl NewMessage {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(sender: Identity, recipient: Option<Identity>, body: impl Into<String>) -> Self {
        Self {
            sender,
            recipient,
            body: body.into(),
            timestamp: timestamp_now(),
        }
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Check if this is a broadcast message.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: MessageId) -> ChatMessage {
        ChatMessage {
            id,
            sender: self.sender,
            recipient: self.recipient,
            body: self.body,
            timestamp: self.timestamp,
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sequence number.
    pub id: MessageId,
    /// Author.
    pub sender: Identity,
    /// Direct recipient, `None` for broadcast.
    pub recipient: Option<Identity>,
    /// Message body.
    pub body: String,
    /// Receipt time.
    pub timestamp: String,
}

impl ChatMessage {
    /// Check if this is a broadcast message.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// Check if this is a direct message between `a` and `b`, in either
    /// direction.
    #[must_use]
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        match &self.recipient {
            Some(recipient) => {
                (self.sender == *a && *recipient == *b) || (self.sender == *b && *recipient == *a)
            }
            None => false,
        }
    }

    /// Build the wire payload for this message.
    #[must_use]
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            sender: self.sender.to_string(),
            recipient: self.recipient.as_ref().map(Identity::to_string),
            message: self.body.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

impl From<&ChatMessage> for MessagePayload {
    fn from(message: &ChatMessage) -> Self {
        message.to_payload()
    }
}
