//! JSON file store
//!
//! One file per record under a data directory:
//!
//! ```text
//! <root>/endpoints/<name>.json
//! <root>/sessions/<endpoint>+<endpoint>.json
//! <root>/settlements/<uuid>.json
//! <root>/lost_and_found/<actor>.json
//! <root>/server.json
//! ```
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so a
//! crash mid-write never leaves a truncated record. A record that fails to
//! decode is logged and skipped; it never blocks startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use tradepost_domain::{
    ActorId, Endpoint, EndpointName, LostAndFound, OfflineSettlement, SessionKey, Side,
    TradeSession,
};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::{
    EndpointRepository, LifecycleRepository, Loaded, LostAndFoundRepository, SessionRepository,
    SettlementRepository, Store,
};

const SERVER_FILE: &str = "server.json";

#[derive(Debug, Serialize, Deserialize)]
struct ServerRecord {
    stopped_at: DateTime<Utc>,
}

// =============================================================================
// Atomic write
// =============================================================================

/// Write `content` to `path` via a temporary file and rename.
async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("json.tmp");

    tokio::fs::write(&tmp_path, content).await.map_err(|e| {
        error!(path = %tmp_path.display(), error = %e, "Failed to write temp file");
        e
    })?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        error!(
            from = %tmp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp file"
        );
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    Ok(())
}

/// Remove a file; a missing file is not an error
async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Collections
// =============================================================================

/// A directory of JSON records of one type.
struct Collection {
    dir: PathBuf,
}

impl Collection {
    fn new(root: &Path, name: &str) -> Self {
        Self {
            dir: root.join(name),
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn put<T: Serialize + Sync>(&self, id: &str, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        atomic_write(&self.path(id), &bytes).await?;
        debug!(path = %self.path(id).display(), "Record written");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path(id)).await
    }

    /// Decode every record, skipping the ones that fail
    async fn load<T: DeserializeOwned>(&self) -> Result<Loaded<T>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::new(Vec::new())),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Loaded::new(Vec::with_capacity(paths.len()));
        for path in paths {
            let decoded = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<T>(&bytes).map_err(StoreError::from),
                Err(e) => Err(StoreError::from(e)),
            };
            match decoded {
                Ok(record) => loaded.records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                    loaded.skipped += 1;
                },
            }
        }
        Ok(loaded)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Durable store backed by JSON files.
pub struct JsonFileStore {
    root: PathBuf,
    endpoints: Collection,
    sessions: Collection,
    settlements: Collection,
    backlogs: Collection,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            endpoints: Collection::new(&root, "endpoints"),
            sessions: Collection::new(&root, "sessions"),
            settlements: Collection::new(&root, "settlements"),
            backlogs: Collection::new(&root, "lost_and_found"),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_id(key: &SessionKey) -> String {
        // '+' never appears in endpoint names
        format!(
            "{}+{}",
            key.endpoint(Side::One).key(),
            key.endpoint(Side::Two).key()
        )
    }
}

#[async_trait]
impl EndpointRepository for JsonFileStore {
    async fn save(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        self.endpoints.put(endpoint.name.key(), endpoint).await
    }

    async fn delete(&self, name: &EndpointName) -> Result<(), StoreError> {
        self.endpoints.remove(name.key()).await
    }

    async fn load_all(&self) -> Result<Loaded<Endpoint>, StoreError> {
        self.endpoints.load().await
    }
}

#[async_trait]
impl SessionRepository for JsonFileStore {
    async fn save(&self, session: &TradeSession) -> Result<(), StoreError> {
        self.sessions.put(&Self::session_id(&session.key), session).await
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.sessions.remove(&Self::session_id(key)).await
    }

    async fn load_all(&self) -> Result<Loaded<TradeSession>, StoreError> {
        self.sessions.load().await
    }
}

#[async_trait]
impl SettlementRepository for JsonFileStore {
    async fn save(&self, settlement: &OfflineSettlement) -> Result<(), StoreError> {
        self.settlements.put(&settlement.id.to_string(), settlement).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.settlements.remove(&id.to_string()).await
    }

    async fn load_all(&self) -> Result<Loaded<OfflineSettlement>, StoreError> {
        self.settlements.load().await
    }
}

#[async_trait]
impl LostAndFoundRepository for JsonFileStore {
    async fn save(&self, backlog: &LostAndFound) -> Result<(), StoreError> {
        self.backlogs.put(&backlog.actor.to_string(), backlog).await
    }

    async fn delete(&self, actor: ActorId) -> Result<(), StoreError> {
        self.backlogs.remove(&actor.to_string()).await
    }

    async fn load_all(&self) -> Result<Loaded<LostAndFound>, StoreError> {
        self.backlogs.load().await
    }
}

#[async_trait]
impl LifecycleRepository for JsonFileStore {
    async fn save_stop(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&ServerRecord { stopped_at: at })
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        atomic_write(&self.root.join(SERVER_FILE), &bytes).await
    }

    async fn load_stop(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.root.join(SERVER_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<ServerRecord>(&bytes) {
            Ok(record) => Ok(Some(record.stopped_at)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable stop record");
                Ok(None)
            },
        }
    }
}

impl Store for JsonFileStore {
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
