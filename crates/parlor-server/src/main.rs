//! # Parlor Server
//!
//! Realtime chat hub: presence, broadcast and direct messages.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parlor
//!
//! # Run with environment overrides
//! PARLOR_PORT=8080 PARLOR_HOST=0.0.0.0 PARLOR_STORAGE__DATABASE_URL=memory parlor
//! ```

use anyhow::Result;
use parlor_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parlor_server=debug,parlor_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting Parlor server on {}:{}", config.host, config.port);

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    handlers::run_server(config).await?;

    Ok(())
}
