//! Tradepost Daemon
//!
//! Runtime orchestrator for trade sessions, reconciliation and the API server.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (in-memory store)
//! cargo run -p tradepostd
//!
//! # Persist state and shorten the grace period
//! TRADEPOST_DATA_DIR=./data TRADEPOST_GRACE_PERIOD_SECS=120 cargo run -p tradepostd
//! ```
//!
//! # Environment Variables
//!
//! - `TRADEPOST_ENV`: Environment (test, development, production)
//! - `TRADEPOST_API_HOST`: API host (default: 0.0.0.0)
//! - `TRADEPOST_API_PORT`: API port (default: 8080)
//! - `TRADEPOST_GRACE_PERIOD_SECS`: Offline grace period (default: 300)
//! - `TRADEPOST_SWEEP_INTERVAL_SECS`: Reconciler cadence (default: 5)
//! - `TRADEPOST_CONFIRM_TTL_SECS`: Exit confirmation lifetime (default: 30)
//! - `TRADEPOST_OVERFLOW`: Items that do not fit: drop or lost_and_found (default: drop)
//! - `TRADEPOST_DATA_DIR`: JSON file store directory (default: in-memory)

use std::sync::Arc;

use tradepost_domain::SystemClock;
use tradepost_exec::StubWorld;
use tradepost_store::JsonFileStore;
use tradepostd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tradepostd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        grace_period_secs = config.trade.grace_period.num_seconds(),
        "Tradepost Daemon"
    );

    // Create and run daemon
    match config.storage.data_dir.clone() {
        Some(dir) => {
            info!(data_dir = %dir.display(), "Using JSON file store");
            let store = Arc::new(JsonFileStore::open(dir).await?);
            let daemon = Daemon::new(config, Arc::new(StubWorld::new()), store, Arc::new(SystemClock));
            daemon.run().await?;
        },
        None => {
            info!("Using in-memory store; state is lost on exit");
            let daemon = Daemon::new_stub(config);
            daemon.run().await?;
        },
    }

    Ok(())
}
