//! In-memory store implementation
//!
//! Used for testing and for running without a data directory.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::{
    EndpointRepository, LifecycleRepository, Loaded, LostAndFoundRepository, SessionRepository,
    SettlementRepository, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tradepost_domain::{
    ActorId, Endpoint, EndpointName, LostAndFound, OfflineSettlement, SessionKey, TradeSession,
};
use uuid::Uuid;

/// In-memory store
pub struct MemoryStore {
    endpoints: RwLock<HashMap<EndpointName, Endpoint>>,
    sessions: RwLock<HashMap<SessionKey, TradeSession>>,
    settlements: RwLock<HashMap<Uuid, OfflineSettlement>>,
    backlogs: RwLock<HashMap<ActorId, LostAndFound>>,
    stopped_at: RwLock<Option<DateTime<Utc>>>,
    /// Reject every write while set (simulates a failing backend)
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            settlements: RwLock::new(HashMap::new()),
            backlogs: RwLock::new(HashMap::new()),
            stopped_at: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn settlement_count(&self) -> usize {
        self.settlements.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stored backlog for one actor
    pub fn backlog(&self, actor: ActorId) -> Option<LostAndFound> {
        self.backlogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&actor)
            .cloned()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.endpoints.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.settlements.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.backlogs.write().unwrap_or_else(|e| e.into_inner()).clear();
        *self.stopped_at.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointRepository for MemoryStore {
    async fn save(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        self.check_writable()?;
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint.name.clone(), endpoint.clone());
        Ok(())
    }

    async fn delete(&self, name: &EndpointName) -> Result<(), StoreError> {
        self.check_writable()?;
        self.endpoints.write().unwrap_or_else(|e| e.into_inner()).remove(name);
        Ok(())
    }

    async fn load_all(&self) -> Result<Loaded<Endpoint>, StoreError> {
        let mut records: Vec<Endpoint> = self
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Loaded::new(records))
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn save(&self, session: &TradeSession) -> Result<(), StoreError> {
        self.check_writable()?;
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.check_writable()?;
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    async fn load_all(&self) -> Result<Loaded<TradeSession>, StoreError> {
        let mut records: Vec<TradeSession> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Loaded::new(records))
    }
}

#[async_trait]
impl SettlementRepository for MemoryStore {
    async fn save(&self, settlement: &OfflineSettlement) -> Result<(), StoreError> {
        self.check_writable()?;
        self.settlements
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(settlement.id, settlement.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_writable()?;
        self.settlements.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Loaded<OfflineSettlement>, StoreError> {
        let mut records: Vec<OfflineSettlement> = self
            .settlements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|s| s.id);
        Ok(Loaded::new(records))
    }
}

#[async_trait]
impl LostAndFoundRepository for MemoryStore {
    async fn save(&self, backlog: &LostAndFound) -> Result<(), StoreError> {
        self.check_writable()?;
        self.backlogs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backlog.actor, backlog.clone());
        Ok(())
    }

    async fn delete(&self, actor: ActorId) -> Result<(), StoreError> {
        self.check_writable()?;
        self.backlogs.write().unwrap_or_else(|e| e.into_inner()).remove(&actor);
        Ok(())
    }

    async fn load_all(&self) -> Result<Loaded<LostAndFound>, StoreError> {
        let mut records: Vec<LostAndFound> = self
            .backlogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|b| b.actor);
        Ok(Loaded::new(records))
    }
}

#[async_trait]
impl LifecycleRepository for MemoryStore {
    async fn save_stop(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.stopped_at.write().unwrap_or_else(|e| e.into_inner()) = Some(at);
        Ok(())
    }

    async fn load_stop(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(*self.stopped_at.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Store for MemoryStore {
    fn endpoints(&self) -> &dyn EndpointRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        self
    }

    fn lost_and_found(&self) -> &dyn LostAndFoundRepository {
        self
    }

    fn lifecycle(&self) -> &dyn LifecycleRepository {
        self
    }
}
