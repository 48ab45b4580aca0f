//! Tradepost Daemon Library
//!
//! Runtime orchestrator for two-party container trades between linked
//! endpoints.
//!
//! # Architecture
//!
//! ```text
//! World adapter → API Server → Coordinator → Engine (registry, planning)
//!                                   │              ↓
//!                                   │         Settlement Executor → World
//!                                   ↓
//!                              Store (crash recovery)
//!                                   ↑
//!                              Reconciler (offline grace period)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Coordinator**: Owns endpoints, sessions, backlogs; runs every transition
//! - **Reconciler**: Periodic sweep that force-settles abandoned trades
//! - **Event Bus**: Internal communication (trade events, status changes)
//! - **API**: HTTP endpoints for the World adapter and admin tooling
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use tradepostd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod reconciler;
pub mod views;

// Re-exports for convenience
pub use config::{ApiConfig, Config, Environment, StorageConfig, TradeConfig};
pub use coordinator::Coordinator;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver};
pub use reconciler::Reconciler;
pub use views::{
    ClaimSummary, ConnectReport, ContainerAccess, DisconnectReport, EndpointInfo, NearbyEndpoint,
    OfferView, Reply, RestoreReport, SessionSummary, SideSummary, SweepReport, TradeUpdate,
};
