//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - Built-in defaults
//! - `parlor.toml` in `~/.config/parlor/`, `/etc/parlor/`, then `./`
//! - Environment variables (`PARLOR_PORT`, `PARLOR_STORAGE__DATABASE_URL`, ...)

use anyhow::{Context, Result};
use parlor_core::{AuthConfig, GatewayConfig, RouterConfig};
use parlor_protocol::Encoding;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Config files, lowest priority first.
const CONFIG_PATHS: [&str; 3] = [
    "~/.config/parlor/parlor.toml",
    "/etc/parlor/parlor.toml",
    "parlor.toml",
];

/// Selects the in-process store instead of SQLite.
pub const MEMORY_DATABASE: &str = "memory";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Encoding used when the client does not ask for one (`json` or `msgpack`).
    #[serde(default = "default_encoding")]
    pub default_encoding: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum message body length in characters.
    #[serde(default = "default_max_body_length")]
    pub max_body_length: usize,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL, or `memory` for the in-process store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// SQLite pool size.
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// bcrypt cost for new accounts.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Name of the session cookie set at login.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_encoding() -> String {
    "json".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_body_length() -> usize {
    4096
}

fn default_outbound_queue() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_database_url() -> String {
    "sqlite://parlor.db".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_bcrypt_cost() -> u32 {
    12
}

fn default_cookie_name() -> String {
    "parlor_session".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            default_encoding: default_encoding(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_body_length: default_max_body_length(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_pool_size(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
            cookie_name: default_cookie_name(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default file locations and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        for path in CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            builder = builder.add_source(
                config::File::new(expanded.as_ref(), config::FileFormat::Toml).required(false),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("PARLOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Check whether the in-process store is selected.
    #[must_use]
    pub fn uses_memory_store(&self) -> bool {
        self.storage.database_url == MEMORY_DATABASE
    }

    /// Encoding for clients that do not request one.
    #[must_use]
    pub fn default_encoding(&self) -> Encoding {
        Encoding::from_name(&self.transport.default_encoding).unwrap_or_default()
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            router: RouterConfig {
                max_body_length: self.limits.max_body_length,
            },
            auth: AuthConfig {
                bcrypt_cost: self.auth.bcrypt_cost,
            },
            outbound_capacity: self.limits.outbound_queue,
        }
    }
}
