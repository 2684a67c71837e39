//! Frame types for the Parlor protocol.
//!
//! Every frame is an event name plus a payload, serialized as
//! `{"event": "<name>", "data": {...}}`. The same shape is used for both
//! JSON text frames and MessagePack binary frames.

use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`ServerFrame::Error`].
pub mod codes {
    /// The inbound frame could not be decoded.
    pub const INVALID_FRAME: u16 = 1001;
    /// The connection has no authenticated identity.
    pub const NOT_AUTHENTICATED: u16 = 1002;
    /// The message could not be persisted and was not delivered.
    pub const STORAGE_FAILURE: u16 = 1003;
    /// The message body exceeds the configured limit.
    pub const MESSAGE_TOO_LONG: u16 = 1004;
}

/// A chat message as seen on the wire and in history queries.
///
/// `recipient` is `null` for broadcast (group) messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Username of the author.
    pub sender: String,
    /// Username of the direct recipient, if any.
    pub recipient: Option<String>,
    /// Message body.
    pub message: String,
    /// Creation time, `%Y-%m-%d %H:%M:%S`.
    pub timestamp: String,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate a connection that was opened without credentials.
    Connect {
        /// Session token issued at login.
        token: Option<String>,
    },

    /// Send a chat message. An absent or empty recipient means broadcast.
    SendMessage {
        /// Direct recipient username.
        recipient: Option<String>,
        /// Message body.
        message: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp, echoed in the pong.
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from the ping.
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Get the event name of this frame.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::Connect { .. } => "connect",
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::Ping { .. } => "ping",
            ClientFrame::Pong { .. } => "pong",
        }
    }

    /// Create a new SendMessage frame.
    #[must_use]
    pub fn send_message(recipient: Option<&str>, message: impl Into<String>) -> Self {
        ClientFrame::SendMessage {
            recipient: recipient.map(str::to_string),
            message: message.into(),
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(token: impl Into<String>) -> Self {
        ClientFrame::Connect {
            token: Some(token.into()),
        }
    }
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection established.
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Bound identity, if the connection authenticated on upgrade.
        username: Option<String>,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A message delivered live.
    NewMessage(MessagePayload),

    /// The current set of online users.
    UserStatus {
        /// Online usernames.
        users: Vec<String>,
    },

    /// Error reported to the originating connection.
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable description.
        message: String,
    },

    /// The connection was superseded or logged out and is about to close.
    Evicted {
        /// Why the connection was closed.
        reason: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp.
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from the ping.
        timestamp: Option<u64>,
    },
}

impl ServerFrame {
    /// Get the event name of this frame.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::NewMessage(_) => "new_message",
            ServerFrame::UserStatus { .. } => "user_status",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Evicted { .. } => "evicted",
            ServerFrame::Ping { .. } => "ping",
            ServerFrame::Pong { .. } => "pong",
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        username: Option<String>,
        heartbeat: u32,
    ) -> Self {
        ServerFrame::Connected {
            connection_id: connection_id.into(),
            username,
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a new UserStatus frame.
    #[must_use]
    pub fn user_status(users: Vec<String>) -> Self {
        ServerFrame::UserStatus { users }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Evicted frame.
    #[must_use]
    pub fn evicted(reason: impl Into<String>) -> Self {
        ServerFrame::Evicted {
            reason: reason.into(),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }
}
