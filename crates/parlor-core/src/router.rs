//! Message routing for Parlor.
//!
//! The router turns one inbound message into one durable record and zero
//! or more live pushes: validate, normalize the recipient, persist, then
//! deliver. Nothing is pushed unless the append succeeded.

use crate::connection::ConnectionHandle;
use crate::identity::Identity;
use crate::message::{normalize_recipient, ChatMessage, NewMessage};
use crate::presence::PresenceRegistry;
use crate::store::{MessageStore, StoreError};
use dashmap::DashMap;
use parlor_protocol::ServerFrame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The message store failed; the message was not delivered.
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum message body length in characters, after trimming.
    pub max_body_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_body_length: 4096,
        }
    }
}

/// An inbound `send_message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Requested recipient; absent or empty means broadcast.
    pub recipient: Option<String>,
    /// Raw body as submitted.
    pub body: String,
}

impl InboundMessage {
    /// Create a broadcast message.
    #[must_use]
    pub fn broadcast(body: impl Into<String>) -> Self {
        Self {
            recipient: None,
            body: body.into(),
        }
    }

    /// Create a direct message.
    #[must_use]
    pub fn direct(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            body: body.into(),
        }
    }
}

/// Why a message was dropped without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sending connection has no identity.
    Unauthenticated,
    /// The body was empty after trimming.
    EmptyBody,
    /// The body exceeded the configured limit.
    TooLong,
}

impl DropReason {
    /// Get a short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Unauthenticated => "unauthenticated",
            DropReason::EmptyBody => "empty_body",
            DropReason::TooLong => "too_long",
        }
    }
}

/// Result of routing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Rejected before persistence.
    Dropped(DropReason),
    /// Persisted and pushed to `pushed` live connections.
    Delivered {
        /// The stored record.
        message: ChatMessage,
        /// Number of successful live pushes.
        pushed: usize,
    },
}

/// The routing engine.
///
/// Messages from the same sender are persisted and pushed one at a time,
/// in submission order. Different senders proceed independently.
pub struct Router {
    store: Arc<dyn MessageStore>,
    presence: Arc<PresenceRegistry>,
    /// Per-sender ordering locks, removed once idle.
    sender_locks: DashMap<Identity, Arc<Mutex<()>>>,
    config: RouterConfig,
}

impl Router {
    /// Create a new router.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        presence: Arc<PresenceRegistry>,
        config: RouterConfig,
    ) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            store,
            presence,
            sender_locks: DashMap::new(),
            config,
        }
    }

    /// Get the presence registry this router delivers through.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Route one inbound message from `sender`.
    ///
    /// Invalid messages are dropped and reported as
    /// [`RouteOutcome::Dropped`]; they never reach the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. No push happens in that case.
    pub async fn route(
        &self,
        sender: Option<&Identity>,
        inbound: InboundMessage,
    ) -> Result<RouteOutcome, RouterError> {
        let Some(sender) = sender else {
            debug!("Dropping message from unauthenticated connection");
            return Ok(RouteOutcome::Dropped(DropReason::Unauthenticated));
        };

        let body = inbound.body.trim();
        if body.is_empty() {
            trace!(sender = %sender, "Dropping empty message");
            return Ok(RouteOutcome::Dropped(DropReason::EmptyBody));
        }
        if body.chars().count() > self.config.max_body_length {
            debug!(sender = %sender, "Dropping oversized message");
            return Ok(RouteOutcome::Dropped(DropReason::TooLong));
        }

        let draft = NewMessage::new(
            sender.clone(),
            normalize_recipient(inbound.recipient.as_deref()),
            body,
        );

        let lock = self.sender_lock(sender);
        let result = {
            let _ordered = lock.lock().await;
            self.persist_and_deliver(draft).await
        };
        drop(lock);
        self.release_sender_lock(sender);

        result
    }

    async fn persist_and_deliver(&self, draft: NewMessage) -> Result<RouteOutcome, RouterError> {
        let id = self.store.append(&draft).await.map_err(|e| {
            warn!(sender = %draft.sender, error = %e, "Message not persisted; delivery aborted");
            e
        })?;

        let message = draft.into_record(id);
        let pushed = self.deliver(&message);

        debug!(
            id = message.id,
            sender = %message.sender,
            recipient = ?message.recipient.as_ref().map(Identity::as_str),
            pushed,
            "Routed message"
        );

        Ok(RouteOutcome::Delivered { message, pushed })
    }

    /// Push a persisted message to its live audience.
    ///
    /// Direct messages go to the recipient (if online) and are echoed to
    /// the sender. Broadcasts go to every connection in a presence
    /// snapshot taken now. Returns the number of successful pushes.
    pub fn deliver(&self, message: &ChatMessage) -> usize {
        let frame = Arc::new(ServerFrame::NewMessage(message.to_payload()));

        let targets = match &message.recipient {
            Some(recipient) => {
                let mut targets = Vec::with_capacity(2);
                targets.extend(self.presence.lookup(recipient.as_str()));
                if *recipient != message.sender {
                    targets.extend(self.presence.lookup(message.sender.as_str()));
                }
                targets
            }
            None => self.presence.connections(),
        };

        push_all(&targets, &frame)
    }

    /// Push the current presence snapshot to every online connection.
    ///
    /// Returns the number of successful pushes.
    pub fn broadcast_presence(&self) -> usize {
        self.presence.broadcast_snapshot()
    }

    /// All broadcast messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_group(&self) -> Result<Vec<ChatMessage>, RouterError> {
        Ok(self.store.list_group().await?)
    }

    /// All direct messages between `a` and `b`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_between(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, RouterError> {
        Ok(self.store.list_between(a, b).await?)
    }

    /// Number of senders with a message in flight.
    #[must_use]
    pub fn in_flight_senders(&self) -> usize {
        self.sender_locks.len()
    }

    fn sender_lock(&self, sender: &Identity) -> Arc<Mutex<()>> {
        self.sender_locks
            .entry(sender.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_sender_lock(&self, sender: &Identity) {
        self.sender_locks
            .remove_if(sender, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn push_all(targets: &[ConnectionHandle], frame: &Arc<ServerFrame>) -> usize {
    let mut delivered = 0;
    for target in targets {
        match target.push(Arc::clone(frame)) {
            Ok(()) => delivered += 1,
            Err(e) => {
                debug!(connection = %target.id(), event = frame.event_name(), error = %e, "Push dropped");
            }
        }
    }
    delivered
}
