use super::{CredentialStore, MessageStore, StoreError, UserRecord};
use crate::identity::Identity;
use crate::message::{ChatMessage, MessageId, NewMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<ChatMessage>,
    users: HashMap<Identity, UserRecord>,
    last_message_id: MessageId,
    last_user_id: i64,
}

/// In-process store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner().messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
        let mut inner = self.inner();
        inner.last_message_id += 1;
        let id = inner.last_message_id;
        inner.messages.push(message.clone().into_record(id));
        Ok(id)
    }

    async fn list_group(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .inner()
            .messages
            .iter()
            .filter(|m| m.is_broadcast())
            .cloned()
            .collect())
    }

    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .inner()
            .messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner().users.get(username).cloned())
    }

    async fn create_user(
        &self,
        username: &Identity,
        password_hash: &str,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner();
        if inner.users.contains_key(username) {
            return Err(StoreError::Conflict(username.to_string()));
        }

        inner.last_user_id += 1;
        let id = inner.last_user_id;
        inner.users.insert(
            username.clone(),
            UserRecord {
                id,
                username: username.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(id)
    }
}
