//! Tradepost Execution Layer
//!
//! Applies settlement plans against the World collaborator.
//!
//! # Architecture
//!
//! ```text
//! Settlement → plan_settlement (engine) → SettlementExecutor → WorldPort
//! ```
//!
//! # Components
//!
//! - **Ports**: `WorldPort`, the only way the core touches containers,
//!   inventories and actors
//! - **Executor**: clears containers, delivers items, routes what cannot be
//!   delivered to the lost-and-found
//! - **Stub**: in-memory world for tests and the standalone daemon

#![warn(clippy::all)]

pub mod error;
pub mod executor;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use executor::{ClaimResult, DeliveryOutcome, SettlementExecutor, SettlementOutcome};
pub use ports::{OverflowPolicy, PreviewView, WorldPort};
pub use stub::StubWorld;
