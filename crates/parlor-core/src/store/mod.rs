//! Durable storage for messages and accounts.
//!
//! Two backends are provided: [`MemoryStore`] for tests and ephemeral
//! deployments, and [`SqliteStore`] for durable history.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::identity::Identity;
use crate::message::{ChatMessage, MessageId, NewMessage};
use async_trait::async_trait;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend cannot serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Row id.
    pub id: i64,
    /// Unique username.
    pub username: Identity,
    /// Password hash.
    pub password_hash: String,
}

/// Append-only message log.
///
/// Retrieval order is the order of assigned ids, which is the order of
/// successful appends.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably record a message and return its sequence number.
    async fn append(&self, message: &NewMessage) -> Result<MessageId, StoreError>;

    /// All broadcast messages, oldest first.
    async fn list_group(&self) -> Result<Vec<ChatMessage>, StoreError>;

    /// All direct messages exchanged between `a` and `b`, oldest first.
    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Account storage used by the authentication service.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up an account by username.
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Create an account.
    ///
    /// Returns [`StoreError::Conflict`] if the username is taken.
    async fn create_user(&self, username: &Identity, password_hash: &str)
        -> Result<i64, StoreError>;
}
