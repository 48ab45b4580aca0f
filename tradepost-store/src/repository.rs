//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the coordinator.
//! Implementations: in-memory for tests, JSON files for durability.
//!
//! Loading never fails because of one bad record: undecodable records are
//! logged, counted in `Loaded::skipped`, and left out.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradepost_domain::{
    ActorId, Endpoint, EndpointName, LostAndFound, OfflineSettlement, SessionKey, TradeSession,
};
use uuid::Uuid;

/// Records read at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    /// Records that could not be decoded
    pub skipped: usize,
}

impl<T> Loaded<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            skipped: 0,
        }
    }
}

/// Repository for endpoints, keyed by name
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// Save an endpoint (insert or update)
    async fn save(&self, endpoint: &Endpoint) -> Result<(), StoreError>;

    /// Save several endpoints, e.g. both sides of a new link
    async fn save_all(&self, endpoints: &[Endpoint]) -> Result<(), StoreError> {
        for endpoint in endpoints {
            self.save(endpoint).await?;
        }
        Ok(())
    }

    /// Delete an endpoint (missing is not an error)
    async fn delete(&self, name: &EndpointName) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Loaded<Endpoint>, StoreError>;
}

/// Repository for active trade sessions, keyed by endpoint pair
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: &TradeSession) -> Result<(), StoreError>;

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Loaded<TradeSession>, StoreError>;
}

/// Repository for settlements awaiting their actor's reconnect
#[async_trait]
pub trait SettlementRepository: Send + Sync {
    async fn save(&self, settlement: &OfflineSettlement) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Loaded<OfflineSettlement>, StoreError>;
}

/// Repository for lost-and-found backlogs, keyed by actor
#[async_trait]
pub trait LostAndFoundRepository: Send + Sync {
    /// Save the full backlog for one actor
    async fn save(&self, backlog: &LostAndFound) -> Result<(), StoreError>;

    async fn delete(&self, actor: ActorId) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Loaded<LostAndFound>, StoreError>;
}

/// Server lifecycle records
#[async_trait]
pub trait LifecycleRepository: Send + Sync {
    /// Record when the server stopped
    async fn save_stop(&self, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Last recorded stop, if any
    async fn load_stop(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    fn endpoints(&self) -> &dyn EndpointRepository;

    fn sessions(&self) -> &dyn SessionRepository;

    fn settlements(&self) -> &dyn SettlementRepository;

    fn lost_and_found(&self) -> &dyn LostAndFoundRepository;

    fn lifecycle(&self) -> &dyn LifecycleRepository;
}
