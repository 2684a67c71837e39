//! # parlor-server
//!
//! HTTP and WebSocket transport for the Parlor chat hub.
//!
//! - `GET /ws` - WebSocket upgrade (`?token=...&encoding=json|msgpack`)
//! - `POST /login` - Log in or register, returns a session token and cookie
//! - `POST /logout` - End the session and evict its live connection
//! - `GET /history/group` - Broadcast history
//! - `GET /history/:other` - Direct history with another user
//! - `GET /health` - Liveness and counters

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
mod socket;

pub use config::Config;
pub use error::ApiError;
pub use handlers::{app, run_server, serve, AppState};
