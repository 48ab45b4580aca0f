//! Execution layer error types.

use thiserror::Error;
use tradepost_domain::{ActorId, ContainerRef, EndpointName};

/// Errors raised while talking to the World collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The World rejected or failed an operation
    #[error("World error: {0}")]
    World(String),

    /// No container behind the reference
    #[error("Unknown container: {0}")]
    UnknownContainer(ContainerRef),

    /// A container no longer holds what the settlement plan delivers from it
    #[error("Contents of {0} changed during settlement")]
    ContentsChanged(EndpointName),

    /// Operation needs the actor online
    #[error("Actor {0} is offline")]
    ActorOffline(ActorId),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
