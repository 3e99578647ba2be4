//! # Pagefeed Server
//!
//! Development channel for live page data updates.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! pagefeed
//!
//! # Run with custom config
//! pagefeed --config /path/to/pagefeed.toml
//!
//! # Run with environment variables
//! PAGEFEED_PORT=8080 PAGEFEED_ROOT=./my-site pagefeed
//! ```

use anyhow::Result;
use pagefeed_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagefeed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_args(std::env::args())?;

    tracing::info!(
        root = %config.root_dir.display(),
        "Starting pagefeed server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
