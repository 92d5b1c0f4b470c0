//! # Tapline Server
//!
//! Relays taps between paired devices, over WebSocket when the recipient
//! is online and as a push notification otherwise.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tapline
//!
//! # Run with a specific config file
//! TAPLINE_CONFIG=/path/to/tapline.toml tapline
//!
//! # Run with environment variables
//! PORT=8080 TAPLINE_PUSH__ENABLED=false tapline
//! ```

mod config;
mod error;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::var_os(config::CONFIG_PATH_ENV) {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        "Starting Tapline server on {}:{} ({} configured pairs)",
        config.host,
        config.port,
        config.pairs.len()
    );

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
