//! Tradepost Storage Layer
//!
//! Durable state for endpoints, active sessions, pending offline
//! settlements, lost-and-found backlogs and the server stop timestamp.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **JSON file store**: One file per record, atomic writes
//!
//! Persistence is best-effort durability for crash recovery. The
//! coordinator's in-memory state is authoritative.

#![warn(clippy::all)]

// Modules
mod error;
mod file;
mod memory;
mod repository;

// Re-exports
pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use repository::{
    EndpointRepository, LifecycleRepository, Loaded, LostAndFoundRepository, SessionRepository,
    SettlementRepository, Store,
};
