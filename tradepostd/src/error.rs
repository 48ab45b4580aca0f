//! Daemon error types.

use thiserror::Error;
use tradepost_domain::{
    ActorId, DomainError, EndpointName, SessionKey, TradeStatus, TransitionError,
};
use tradepost_engine::RegistryError;
use tradepost_exec::ExecError;
use tradepost_store::StoreError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Invalid input value
    #[error("Validation error: {0}")]
    Domain(#[from] DomainError),

    /// Registry rejected the change
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// World collaborator failed
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Persistence failed where it cannot be downgraded to a warning
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Wrong state for the requested transition; nothing changed
    #[error("{message} (trade status: {status})")]
    Precondition { status: TradeStatus, message: String },

    /// The actor has no active trade
    #[error("Actor {0} is not trading")]
    NotTrading(ActorId),

    /// Unknown actor, session or other entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Endpoint exists but has no proper link
    #[error("Endpoint {0} is not linked to a partner")]
    NotLinked(EndpointName),

    /// Endpoint is part of an active trade
    #[error("Endpoint {endpoint} is in use by trade {key}")]
    EndpointInUse { endpoint: EndpointName, key: SessionKey },

    /// Session contradicted its own status and was force-settled
    #[error("Trade {key} was inconsistent and has been force-settled: {message}")]
    InvariantViolation { key: String, message: String },

    /// Malformed request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl From<TransitionError> for DaemonError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Precondition { status, message } => {
                DaemonError::Precondition { status, message }
            },
            TransitionError::InvariantViolation { key, message } => {
                DaemonError::InvariantViolation { key, message }
            },
        }
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
