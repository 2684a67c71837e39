//! Delivery handles for live connections.
//!
//! The hub never touches a socket directly. Each live connection is
//! represented by a [`ConnectionHandle`] that queues outbound frames, and
//! the transport drains the paired [`Mailbox`].

use parlor_protocol::ServerFrame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric ID.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Push errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// The connection is gone.
    #[error("Connection closed")]
    Closed,

    /// The connection is not draining its queue fast enough.
    #[error("Outbound queue full")]
    Full,
}

/// Why a connection was forcibly closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// A newer connection bound the same identity.
    Superseded,
    /// The identity logged out.
    LoggedOut,
}

impl EvictReason {
    /// Get a short description for the client.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictReason::Superseded => "superseded by a newer connection",
            EvictReason::LoggedOut => "logged out",
        }
    }
}

/// Sending half of a live connection.
///
/// Cloning is cheap; all clones feed the same mailbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::Sender<Arc<ServerFrame>>,
    eviction: Arc<watch::Sender<Option<EvictReason>>>,
}

impl ConnectionHandle {
    /// Create a handle and its mailbox with the given queue capacity.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Mailbox) {
        let (outbox, frames) = mpsc::channel(capacity.max(1));
        let (eviction, evicted) = watch::channel(None);

        let handle = Self {
            id: ConnectionId::next(),
            outbox,
            eviction: Arc::new(eviction),
        };
        (handle, Mailbox { frames, evicted })
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for delivery without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or its queue is full.
    pub fn push(&self, frame: Arc<ServerFrame>) -> Result<(), PushError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Ask the connection to close. Idempotent; the first reason wins.
    pub fn evict(&self, reason: EvictReason) {
        self.eviction.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Check whether the mailbox has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// What a connection loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Mailed {
    /// Write this frame to the client.
    Frame(Arc<ServerFrame>),
    /// Close the connection.
    Evicted(EvictReason),
    /// Every handle is gone.
    Closed,
}

/// Receiving half of a live connection, drained by the transport.
#[derive(Debug)]
pub struct Mailbox {
    frames: mpsc::Receiver<Arc<ServerFrame>>,
    evicted: watch::Receiver<Option<EvictReason>>,
}

impl Mailbox {
    /// Wait for the next outbound frame or an eviction.
    ///
    /// Eviction takes priority over queued frames.
    pub async fn recv(&mut self) -> Mailed {
        if let Some(reason) = *self.evicted.borrow_and_update() {
            return Mailed::Evicted(reason);
        }

        let mut eviction_open = true;
        loop {
            tokio::select! {
                biased;

                changed = self.evicted.changed(), if eviction_open => {
                    if changed.is_err() {
                        eviction_open = false;
                        continue;
                    }
                    if let Some(reason) = *self.evicted.borrow_and_update() {
                        return Mailed::Evicted(reason);
                    }
                }

                frame = self.frames.recv() => {
                    return frame.map_or(Mailed::Closed, Mailed::Frame);
                }
            }
        }
    }

    /// Check for an eviction without waiting.
    #[must_use]
    pub fn eviction(&self) -> Option<EvictReason> {
        *self.evicted.borrow()
    }

    /// Take a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ServerFrame>> {
        self.frames.try_recv().ok()
    }
}
