//! Engine error types.

use thiserror::Error;
use tradepost_domain::{ContainerRef, EndpointName};

/// Errors raised by the endpoint registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No endpoint with that name
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    /// Name already taken (case-insensitive)
    #[error("Endpoint already exists: {0}")]
    DuplicateName(EndpointName),

    /// Another endpoint already owns the container
    #[error("Container {container} already belongs to endpoint {owner}")]
    ContainerInUse {
        container: ContainerRef,
        owner: EndpointName,
    },

    /// An endpoint cannot be linked to itself
    #[error("Cannot link endpoint {0} to itself")]
    SelfLink(EndpointName),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, RegistryError>;
