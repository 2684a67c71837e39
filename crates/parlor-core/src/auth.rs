//! Authentication and session tokens.
//!
//! The first successful login for a username registers it; later logins
//! must present the same password. A successful login yields a session
//! token that transports pass back on every connect.

use crate::identity::Identity;
use crate::store::{CredentialStore, StoreError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password was empty.
    #[error("Both username and password are required")]
    MissingCredentials,

    /// The account exists and the password does not match.
    #[error("Invalid password")]
    InvalidPassword,

    /// The username was claimed concurrently; retry as a login.
    #[error("Username already registered: {0}")]
    RegistrationConflict(String),

    /// Password hashing failed.
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    /// Account storage failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// bcrypt cost factor for new password hashes.
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Opaque session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The authenticated identity.
    pub identity: Identity,
    /// Whether the account was created by this call.
    pub registered: bool,
}

/// A logged-in session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The session owner.
    pub identity: Identity,
    /// Token to present on connect.
    pub token: SessionToken,
    /// Whether the account was created by this login.
    pub registered: bool,
}

/// Credential checks and the live session table.
///
/// An identity holds at most one token at a time: repeated logins hand
/// back the live token, so the table is bounded by the number of accounts.
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: DashMap<String, Identity>,
    tokens: DashMap<Identity, String>,
    config: AuthConfig,
}

impl AuthService {
    /// Create a new authentication service.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>, config: AuthConfig) -> Self {
        Self {
            credentials,
            sessions: DashMap::new(),
            tokens: DashMap::new(),
            config,
        }
    }

    /// Check a username/password pair, registering the username on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns an error if either field is empty, the password does not
    /// match, the username was registered concurrently, or storage fails.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Authenticated, AuthError> {
        let password = password.trim();
        let identity = match Identity::parse(username) {
            Some(identity) if !password.is_empty() => identity,
            _ => return Err(AuthError::MissingCredentials),
        };

        if let Some(user) = self.credentials.find_user(identity.as_str()).await? {
            if !verify_password(password, &user.password_hash).await? {
                debug!(identity = %identity, "Login rejected: invalid password");
                return Err(AuthError::InvalidPassword);
            }
            return Ok(Authenticated {
                identity,
                registered: false,
            });
        }

        let hash = hash_password(password, self.config.bcrypt_cost).await?;
        match self.credentials.create_user(&identity, &hash).await {
            Ok(_) => {
                info!(identity = %identity, "Registered new account");
                Ok(Authenticated {
                    identity,
                    registered: true,
                })
            }
            Err(StoreError::Conflict(name)) => Err(AuthError::RegistrationConflict(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate and issue a session token.
    ///
    /// # Errors
    ///
    /// See [`AuthService::authenticate`].
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let Authenticated {
            identity,
            registered,
        } = self.authenticate(username, password).await?;

        let token = self.issue(identity.clone());
        Ok(Session {
            identity,
            token,
            registered,
        })
    }

    /// Issue a session token for an already authenticated identity.
    ///
    /// Returns the identity's live token if it has one.
    pub fn issue(&self, identity: Identity) -> SessionToken {
        // `sessions` only changes while the identity's `tokens` entry is held.
        match self.tokens.entry(identity) {
            Entry::Occupied(entry) => {
                debug!(identity = %entry.key(), "Session reused");
                SessionToken(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let token = SessionToken::generate();
                debug!(identity = %entry.key(), "Session issued");
                self.sessions.insert(token.0.clone(), entry.key().clone());
                entry.insert(token.0.clone());
                token
            }
        }
    }

    /// Resolve a session token to its identity.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<Identity> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    /// Revoke a session token, returning the identity that held it.
    pub fn revoke(&self, token: &str) -> Option<Identity> {
        let identity = self.resolve(token)?;
        match self.tokens.entry(identity) {
            Entry::Occupied(entry) if entry.get() == token => {
                self.sessions.remove(token);
                Some(entry.remove_entry().0)
            }
            _ => None,
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}
