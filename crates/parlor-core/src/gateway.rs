//! Session gateway.
//!
//! Bridges transport lifecycle events (open, connect, message, disconnect)
//! to the authentication service, presence registry and router. A
//! transport owns one [`Peer`] per socket and calls into the gateway for
//! everything else.

use crate::auth::{AuthConfig, AuthError, AuthService, Session};
use crate::connection::{
    ConnectionHandle, ConnectionId, EvictReason, Mailbox, DEFAULT_OUTBOUND_CAPACITY,
};
use crate::identity::Identity;
use crate::message::ChatMessage;
use crate::presence::PresenceRegistry;
use crate::router::{InboundMessage, RouteOutcome, Router, RouterConfig, RouterError};
use crate::store::{CredentialStore, MessageStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Routing limits.
    pub router: RouterConfig,
    /// Password hashing settings.
    pub auth: AuthConfig,
    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            auth: AuthConfig::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Credentials offered when a connection authenticates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    /// Transport-level token (query parameter, bearer header or frame).
    pub token: Option<&'a str>,
    /// Server-side session from a cookie.
    pub session: Option<&'a str>,
}

impl<'a> Credentials<'a> {
    /// Credentials carrying only a transport token.
    #[must_use]
    pub fn token(token: &'a str) -> Self {
        Self {
            token: Some(token),
            session: None,
        }
    }
}

/// Gateway-side state of one transport connection.
#[derive(Debug)]
pub struct Peer {
    handle: ConnectionHandle,
    identity: Option<Identity>,
}

impl Peer {
    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Get the bound identity, if authenticated.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Check whether this connection is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// The hub's entry point for transports.
pub struct Gateway {
    auth: AuthService,
    presence: Arc<PresenceRegistry>,
    router: Router,
    outbound_capacity: usize,
}

impl Gateway {
    /// Create a gateway over separate message and credential stores.
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageStore>,
        credentials: Arc<dyn CredentialStore>,
        config: GatewayConfig,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        Self {
            auth: AuthService::new(credentials, config.auth),
            router: Router::new(messages, Arc::clone(&presence), config.router),
            presence,
            outbound_capacity: config.outbound_capacity,
        }
    }

    /// Create a gateway over one store serving both roles.
    #[must_use]
    pub fn with_store<S>(store: Arc<S>, config: GatewayConfig) -> Self
    where
        S: MessageStore + CredentialStore + 'static,
    {
        Self::new(store.clone(), store, config)
    }

    /// Get the authentication service.
    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Get the presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Get the router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accept a new transport connection.
    ///
    /// The connection starts unauthenticated and is not yet online.
    #[must_use]
    pub fn open(&self) -> (Peer, Mailbox) {
        let (handle, mailbox) = ConnectionHandle::channel(self.outbound_capacity);
        debug!(connection = %handle.id(), "Connection opened");
        (
            Peer {
                handle,
                identity: None,
            },
            mailbox,
        )
    }

    /// Authenticate `peer` and bring its identity online.
    ///
    /// The transport token is tried first, then the cookie session. On
    /// success any older connection for the identity is evicted and the
    /// new presence snapshot is broadcast. A peer that is already bound
    /// keeps its identity.
    pub fn connect(&self, peer: &mut Peer, credentials: Credentials<'_>) -> Option<Identity> {
        if let Some(identity) = &peer.identity {
            debug!(connection = %peer.id(), identity = %identity, "Connect ignored: already bound");
            return Some(identity.clone());
        }

        let identity = credentials
            .token
            .and_then(|token| self.auth.resolve(token))
            .or_else(|| credentials.session.and_then(|s| self.auth.resolve(s)));

        let Some(identity) = identity else {
            debug!(connection = %peer.id(), "Connection remains unauthenticated");
            return None;
        };

        self.presence
            .bind_and_broadcast(identity.clone(), peer.handle.clone());
        peer.identity = Some(identity.clone());

        Some(identity)
    }

    /// Take `peer` offline.
    ///
    /// Only the connection currently bound to the identity is removed; a
    /// superseded connection disconnecting changes nothing.
    pub fn disconnect(&self, peer: Peer) {
        let Some(identity) = peer.identity else {
            debug!(connection = %peer.handle.id(), "Unauthenticated connection closed");
            return;
        };

        self.presence
            .unbind_and_broadcast(identity.as_str(), peer.handle.id());
    }

    /// Route an inbound message from `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be persisted.
    pub async fn message(
        &self,
        peer: &Peer,
        inbound: InboundMessage,
    ) -> Result<RouteOutcome, RouterError> {
        self.router.route(peer.identity.as_ref(), inbound).await
    }

    /// Log in and issue a session token.
    ///
    /// # Errors
    ///
    /// See [`AuthService::login`].
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        self.auth.login(username, password).await
    }

    /// Revoke `token` and take its identity offline.
    ///
    /// Returns the identity that held the token.
    pub fn logout(&self, token: &str) -> Option<Identity> {
        let identity = self.auth.revoke(token)?;
        info!(identity = %identity, "Logged out");

        if let Some(handle) = self.presence.remove_and_broadcast(identity.as_str()) {
            handle.evict(EvictReason::LoggedOut);
        }

        Some(identity)
    }

    /// Resolve a session token to its identity.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<Identity> {
        self.auth.resolve(token)
    }

    /// Group history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history_group(&self) -> Result<Vec<ChatMessage>, RouterError> {
        self.router.list_group().await
    }

    /// Direct history between `me` and `other`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history_between(
        &self,
        me: &Identity,
        other: &str,
    ) -> Result<Vec<ChatMessage>, RouterError> {
        self.router.list_between(me.as_str(), other.trim()).await
    }

    /// Current presence snapshot.
    #[must_use]
    pub fn online(&self) -> Vec<Identity> {
        self.presence.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Mailed;
    use crate::store::MemoryStore;
    use parlor_protocol::ServerFrame;

    fn gateway() -> Gateway {
        Gateway::with_store(
            Arc::new(MemoryStore::new()),
            GatewayConfig {
                auth: AuthConfig { bcrypt_cost: 4 },
                ..GatewayConfig::default()
            },
        )
    }

    async fn join(gateway: &Gateway, name: &str) -> (Peer, Mailbox, String) {
        let session = gateway.login(name, "pw").await.unwrap();
        let token = session.token.to_string();
        let (mut peer, mailbox) = gateway.open();
        assert!(gateway.connect(&mut peer, Credentials::token(&token)).is_some());
        (peer, mailbox, token)
    }

    async fn next_frame(mailbox: &mut Mailbox) -> ServerFrame {
        match mailbox.recv().await {
            Mailed::Frame(frame) => frame.as_ref().clone(),
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    fn users(frame: &ServerFrame) -> Vec<String> {
        match frame {
            ServerFrame::UserStatus { users } => users.clone(),
            other => panic!("Expected user_status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_broadcasts_presence() {
        let gateway = gateway();
        let (_a, mut a_mail, _) = join(&gateway, "alice").await;
        assert_eq!(users(&next_frame(&mut a_mail).await), vec!["alice"]);

        let (_b, mut b_mail, _) = join(&gateway, "bob").await;
        assert_eq!(users(&next_frame(&mut a_mail).await), vec!["alice", "bob"]);
        assert_eq!(users(&next_frame(&mut b_mail).await), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_unauthenticated_connect_stays_offline() {
        let gateway = gateway();
        let (mut peer, _mailbox) = gateway.open();

        assert!(gateway.connect(&mut peer, Credentials::token("bogus")).is_none());
        assert!(gateway.connect(&mut peer, Credentials::default()).is_none());
        assert!(!peer.is_authenticated());
        assert!(gateway.online().is_empty());

        let outcome = gateway
            .message(&peer, InboundMessage::broadcast("hi"))
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Dropped(_)));
        assert!(gateway.history_group().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cookie_session_fallback() {
        let gateway = gateway();
        let session = gateway.login("alice", "pw").await.unwrap();
        let (mut peer, _mailbox) = gateway.open();

        let identity = gateway.connect(
            &mut peer,
            Credentials {
                token: Some("stale"),
                session: Some(session.token.as_str()),
            },
        );

        assert_eq!(identity, Some(Identity::new("alice")));
    }

    #[tokio::test]
    async fn test_second_connection_supersedes_first() {
        let gateway = gateway();
        let session = gateway.login("alice", "pw").await.unwrap();
        let token = session.token.as_str();

        let (mut first, mut first_mail) = gateway.open();
        gateway.connect(&mut first, Credentials::token(token));
        let (mut second, _second_mail) = gateway.open();
        gateway.connect(&mut second, Credentials::token(token));

        assert_eq!(first_mail.recv().await, Mailed::Evicted(EvictReason::Superseded));
        assert_eq!(
            gateway.presence().lookup("alice").map(|h| h.id()),
            Some(second.id())
        );

        // The stale disconnect must not take the new connection offline.
        gateway.disconnect(first);
        assert!(gateway.presence().is_online("alice"));

        gateway.disconnect(second);
        assert!(!gateway.presence().is_online("alice"));
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_presence() {
        let gateway = gateway();
        let (a, _a_mail, _) = join(&gateway, "alice").await;
        let (_b, mut b_mail, _) = join(&gateway, "bob").await;
        next_frame(&mut b_mail).await;

        gateway.disconnect(a);

        assert_eq!(users(&next_frame(&mut b_mail).await), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_logout_evicts_and_revokes() {
        let gateway = gateway();
        let (_a, mut a_mail, token) = join(&gateway, "alice").await;
        let (_b, mut b_mail, _) = join(&gateway, "bob").await;
        next_frame(&mut b_mail).await;

        assert_eq!(gateway.logout(&token), Some(Identity::new("alice")));

        assert_eq!(a_mail.recv().await, Mailed::Evicted(EvictReason::LoggedOut));
        assert_eq!(users(&next_frame(&mut b_mail).await), vec!["bob"]);
        assert!(gateway.resolve(&token).is_none());
        assert!(gateway.logout(&token).is_none());
    }

    #[tokio::test]
    async fn test_offline_user_reads_broadcast_later() {
        let gateway = gateway();
        let (a, mut a_mail, _) = join(&gateway, "alice").await;
        next_frame(&mut a_mail).await;

        gateway
            .message(&a, InboundMessage::broadcast("before bob"))
            .await
            .unwrap();
        assert!(matches!(next_frame(&mut a_mail).await, ServerFrame::NewMessage(_)));

        let (b, _b_mail, _) = join(&gateway, "bob").await;
        let history = gateway.history_group().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "before bob");

        let direct = gateway
            .history_between(b.identity().unwrap(), "alice")
            .await
            .unwrap();
        assert!(direct.is_empty());
    }

    #[tokio::test]
    async fn test_connect_when_already_bound_is_ignored() {
        let gateway = gateway();
        let (mut a, _a_mail, _) = join(&gateway, "alice").await;
        let bob = gateway.login("bob", "pw").await.unwrap();

        let identity = gateway.connect(&mut a, Credentials::token(bob.token.as_str()));

        assert_eq!(identity, Some(Identity::new("alice")));
        assert_eq!(gateway.online(), vec![Identity::new("alice")]);
    }

    #[test]
    fn test_last_presence_frame_matches_registry_under_churn() {
        let gateway = Gateway::with_store(
            Arc::new(MemoryStore::new()),
            GatewayConfig {
                auth: AuthConfig { bcrypt_cost: 4 },
                outbound_capacity: 1024,
                ..GatewayConfig::default()
            },
        );
        let watcher_token = gateway.auth().issue(Identity::new("watcher"));
        let (mut watcher, mut watcher_mail) = gateway.open();
        gateway.connect(&mut watcher, Credentials::token(watcher_token.as_str()));

        let tokens: Vec<String> = (0..8)
            .map(|i| gateway.auth().issue(Identity::new(format!("user{i}"))).to_string())
            .collect();

        for round in 0..300 {
            std::thread::scope(|scope| {
                for (i, token) in tokens.iter().enumerate() {
                    let gateway = &gateway;
                    scope.spawn(move || {
                        let (mut peer, _mailbox) = gateway.open();
                        gateway.connect(&mut peer, Credentials::token(token));
                        if i % 2 == 0 {
                            gateway.disconnect(peer);
                        }
                    });
                }
            });

            let mut last = None;
            while let Some(frame) = watcher_mail.try_recv() {
                if let ServerFrame::UserStatus { users } = frame.as_ref() {
                    last = Some(users.clone());
                }
            }
            let online: Vec<String> = gateway
                .online()
                .into_iter()
                .map(Identity::into_string)
                .collect();
            assert_eq!(last, Some(online), "stale user_status after round {round}");
        }
    }
}
