//! Presence tracking for Parlor.
//!
//! The registry is the single source of truth for who is online and how to
//! reach them. Each identity owns at most one live connection; binding a
//! second connection evicts the first.

use crate::connection::{ConnectionHandle, ConnectionId, EvictReason};
use crate::identity::Identity;
use parlor_protocol::ServerFrame;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type Bindings = BTreeMap<Identity, ConnectionHandle>;

/// Registry of online identities and their delivery handles.
///
/// Every operation runs inside one critical section, so two concurrent
/// binds for the same identity can never both survive. The `*_and_broadcast`
/// variants also push the resulting `user_status` frame inside that section,
/// so every connection receives snapshots in the order the changes landed.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    bindings: Mutex<Bindings>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bindings(&self) -> MutexGuard<'_, Bindings> {
        // No operation can leave the map half-updated, so a poisoned lock
        // still holds a consistent map.
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `identity` as online through `handle`.
    ///
    /// A previous connection for the same identity is evicted and returned.
    /// Binding the connection that is already bound is a no-op.
    pub fn bind(&self, identity: Identity, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.bind_with(identity, handle, false)
    }

    /// [`bind`](Self::bind), then push the new snapshot to everyone online
    /// before the lock is released.
    pub fn bind_and_broadcast(
        &self,
        identity: Identity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.bind_with(identity, handle, true)
    }

    fn bind_with(
        &self,
        identity: Identity,
        handle: ConnectionHandle,
        announce: bool,
    ) -> Option<ConnectionHandle> {
        let connection = handle.id();
        let previous = {
            let mut bindings = self.bindings();
            if bindings.get(&identity).map(ConnectionHandle::id) == Some(connection) {
                return None;
            }
            let previous = bindings.insert(identity.clone(), handle);
            if announce {
                push_status(&bindings);
            }
            previous
        };

        match &previous {
            Some(old) => {
                warn!(
                    identity = %identity,
                    evicted = %old.id(),
                    connection = %connection,
                    "Presence: connection superseded"
                );
                old.evict(EvictReason::Superseded);
            }
            None => info!(identity = %identity, connection = %connection, "Presence: online"),
        }

        previous
    }

    /// Remove `identity` if it is still bound to `connection`.
    ///
    /// Returns `true` if the binding was removed. A disconnect from a
    /// connection that was already superseded leaves the newer one alone.
    pub fn unbind(&self, identity: &str, connection: ConnectionId) -> bool {
        self.unbind_with(identity, connection, false)
    }

    /// [`unbind`](Self::unbind), broadcasting the snapshot only when the
    /// binding was actually removed.
    pub fn unbind_and_broadcast(&self, identity: &str, connection: ConnectionId) -> bool {
        self.unbind_with(identity, connection, true)
    }

    fn unbind_with(&self, identity: &str, connection: ConnectionId, announce: bool) -> bool {
        let bound = {
            let mut bindings = self.bindings();
            match bindings.get(identity).map(ConnectionHandle::id) {
                Some(current) if current == connection => {
                    bindings.remove(identity);
                    if announce {
                        push_status(&bindings);
                    }
                    Some(true)
                }
                Some(_) => Some(false),
                None => None,
            }
        };

        match bound {
            Some(true) => {
                info!(identity = %identity, connection = %connection, "Presence: offline");
                true
            }
            Some(false) => {
                debug!(identity = %identity, connection = %connection, "Presence: stale unbind ignored");
                false
            }
            None => false,
        }
    }

    /// Remove `identity` whatever connection it is bound to.
    pub fn remove(&self, identity: &str) -> Option<ConnectionHandle> {
        self.remove_with(identity, false)
    }

    /// [`remove`](Self::remove), broadcasting the snapshot if anything was
    /// removed.
    pub fn remove_and_broadcast(&self, identity: &str) -> Option<ConnectionHandle> {
        self.remove_with(identity, true)
    }

    fn remove_with(&self, identity: &str, announce: bool) -> Option<ConnectionHandle> {
        let removed = {
            let mut bindings = self.bindings();
            let removed = bindings.remove(identity);
            if announce && removed.is_some() {
                push_status(&bindings);
            }
            removed
        };
        if let Some(handle) = &removed {
            info!(identity = %identity, connection = %handle.id(), "Presence: removed");
        }
        removed
    }

    /// Push the current snapshot to every online connection.
    ///
    /// Returns the number of successful pushes.
    pub fn broadcast_snapshot(&self) -> usize {
        push_status(&self.bindings())
    }

    /// Get the live connection for `identity`.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.bindings().get(identity).cloned()
    }

    /// Check if `identity` is online.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.bindings().contains_key(identity)
    }

    /// Get the number of online identities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bindings().len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings().is_empty()
    }

    /// Get the online identities, sorted by username.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Identity> {
        self.bindings().keys().cloned().collect()
    }

    /// Get every live connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.bindings().values().cloned().collect()
    }
}

/// Push a `user_status` frame built from `bindings` to each bound
/// connection. Pushes never block, so this is safe under the registry lock.
fn push_status(bindings: &Bindings) -> usize {
    let users = bindings
        .keys()
        .map(|identity| identity.as_str().to_owned())
        .collect();
    let frame = Arc::new(ServerFrame::user_status(users));

    let mut delivered = 0;
    for handle in bindings.values() {
        match handle.push(Arc::clone(&frame)) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(connection = %handle.id(), error = %e, "Presence push dropped"),
        }
    }
    delivered
}
