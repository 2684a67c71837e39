//! # parlor-core
//!
//! Presence, routing and storage for the Parlor chat hub.
//!
//! This crate provides the hub itself, independent of any transport:
//!
//! - **Gateway** - Entry point for transports: connect, message, disconnect
//! - **Auth** - Register-on-first-login accounts and session tokens
//! - **Presence** - Who is online, one connection per identity
//! - **Router** - Validate, persist, then push each message
//! - **Store** - Durable message log and accounts (memory or SQLite)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Gateway   │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │             │         │
//!        │                   ▼             ▼         ▼
//! ┌─────────────┐     ┌─────────────┐ ┌─────────┐ ┌─────────┐
//! │   Mailbox   │◀────│  Presence   │ │  Store  │ │  Auth   │
//! └─────────────┘     └─────────────┘ └─────────┘ └─────────┘
//! ```

pub mod auth;
pub mod connection;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod presence;
pub mod router;
pub mod store;

pub use auth::{AuthConfig, AuthError, AuthService, Session, SessionToken};
pub use connection::{ConnectionHandle, ConnectionId, EvictReason, Mailbox, Mailed, PushError};
pub use gateway::{Credentials, Gateway, GatewayConfig, Peer};
pub use identity::Identity;
pub use message::{ChatMessage, MessageId, NewMessage};
pub use presence::PresenceRegistry;
pub use router::{DropReason, InboundMessage, RouteOutcome, Router, RouterConfig, RouterError};
pub use store::{CredentialStore, MemoryStore, MessageStore, SqliteStore, StoreError};
