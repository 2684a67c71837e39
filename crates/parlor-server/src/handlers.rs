//! HTTP handlers for the Parlor server.
//!
//! Login, logout and history are plain JSON endpoints; the WebSocket
//! endpoint hands the upgraded socket to [`crate::socket`].

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics;
use crate::socket::{self, Upgrade};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cookie::{Cookie, SameSite};
use parlor_core::{ChatMessage, Gateway, Identity, MemoryStore, SqliteStore};
use parlor_protocol::{Encoding, MessagePayload};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub gateway: Gateway,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Open the configured store and build the hub on top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened.
    pub async fn open(config: Config) -> Result<Self> {
        let gateway = if config.uses_memory_store() {
            info!("Using in-memory store; history is lost on restart");
            Gateway::with_store(Arc::new(MemoryStore::new()), config.gateway())
        } else {
            let store = SqliteStore::connect(
                &config.storage.database_url,
                config.storage.max_connections,
            )
            .await
            .with_context(|| format!("Failed to open {}", config.storage.database_url))?;
            Gateway::with_store(Arc::new(store), config.gateway())
        };

        Ok(Self::with_gateway(gateway, config))
    }

    /// Create state around an existing gateway.
    #[must_use]
    pub fn with_gateway(gateway: Gateway, config: Config) -> Self {
        Self {
            gateway,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// A reserved WebSocket slot, released on drop.
pub(crate) struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/history/group", get(group_history_handler))
        .route("/history/:other", get(direct_history_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::open(config).await?);

    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(state.config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let listener = TcpListener::bind(addr).await?;

    info!("Parlor server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.active_connections(),
        "online": state.gateway.presence().count(),
    }))
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Session token.
    pub token: Option<String>,
    /// `json` or `msgpack`.
    pub encoding: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    let encoding = match params.encoding.as_deref() {
        Some(name) => match Encoding::from_name(name) {
            Some(encoding) => encoding,
            None => return (StatusCode::BAD_REQUEST, "Unknown encoding").into_response(),
        },
        None => state.config.default_encoding(),
    };

    let upgrade = Upgrade {
        encoding,
        token: params.token.or_else(|| bearer_token(&headers)),
        session: cookie_token(&headers, &state.config.auth.cookie_name),
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| socket::handle_socket(socket, state, slot, upgrade))
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub username: String,
    pub token: String,
    pub registered: bool,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .gateway
        .login(&request.username, &request.password)
        .await?;

    let cookie = Cookie::build((state.config.auth.cookie_name.clone(), session.token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Json(LoginResponse {
            username: session.identity.into_string(),
            token: session.token.to_string(),
            registered: session.registered,
        }),
    ))
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = request_token(&headers, &state.config.auth.cookie_name)
        .ok_or(ApiError::NotLoggedIn)?;
    let identity = state
        .gateway
        .logout(&token)
        .ok_or(ApiError::InvalidSession)?;
    metrics::set_online(state.gateway.presence().count());

    let mut removal = Cookie::build((state.config.auth.cookie_name.clone(), "")).path("/").build();
    removal.make_removal();

    Ok((
        [(header::SET_COOKIE, removal.to_string())],
        Json(serde_json::json!({ "username": identity.as_str() })),
    ))
}

async fn group_history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    require_identity(&state, &headers)?;
    let messages = state.gateway.history_group().await?;
    Ok(Json(payloads(&messages)))
}

async fn direct_history_handler(
    State(state): State<Arc<AppState>>,
    Path(other): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    let me = require_identity(&state, &headers)?;
    let messages = state.gateway.history_between(&me, &other).await?;
    Ok(Json(payloads(&messages)))
}

fn payloads(messages: &[ChatMessage]) -> Vec<MessagePayload> {
    messages.iter().map(MessagePayload::from).collect()
}

fn require_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token =
        request_token(headers, &state.config.auth.cookie_name).ok_or(ApiError::NotLoggedIn)?;
    state
        .gateway
        .resolve(&token)
        .ok_or(ApiError::InvalidSession)
}

/// Bearer token first, session cookie second.
fn request_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_token(headers, cookie_name))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}
