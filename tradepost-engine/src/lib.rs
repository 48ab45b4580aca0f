//! Tradepost Engine: pure coordination logic
//!
//! No I/O and no clocks; every function takes the state it needs.
//!
//! - `registry`: Endpoint Pair Registry (one-to-one symmetric links)
//! - `transfer`: Item Transfer Engine (merge, fill, leftover)
//! - `settlement`: delivery planning for closed sessions

pub mod error;
pub mod registry;
pub mod settlement;
pub mod transfer;

pub use error::{EngineResult, RegistryError};
pub use registry::{EndpointRegistry, LinkCorrection, LinkReport, UnlinkReport};
pub use settlement::{
    downgrade, plan_settlement, verify_offers, ContainerClear, Delivery, SettlementPlan,
};
pub use transfer::{same_contents, transfer, TransferResult};
