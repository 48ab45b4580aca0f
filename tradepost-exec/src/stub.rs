//! Stub World for testing and the standalone daemon.
//!
//! Containers, inventories and online flags live in memory. Every side
//! effect the core asks for (notifications, drops, previews, relocations)
//! is recorded so tests can assert on it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tradepost_domain::{ActorId, ContainerRef, ItemStack, Location, Slots};

use crate::error::ExecError;
use crate::ports::{PreviewView, WorldPort};

/// Slot count for containers and inventories created on first use
pub const DEFAULT_SLOTS: usize = 27;

/// In-memory world.
pub struct StubWorld {
    containers: RwLock<HashMap<ContainerRef, Slots>>,
    inventories: RwLock<HashMap<ActorId, Slots>>,
    online: RwLock<HashSet<ActorId>>,
    notifications: RwLock<Vec<(ActorId, String)>>,
    drops: RwLock<Vec<(ActorId, Vec<ItemStack>)>>,
    previews: RwLock<Vec<PreviewView>>,
    relocations: RwLock<Vec<(ActorId, Location)>>,
    /// Fail every inventory read/write while set
    fail_inventory: RwLock<bool>,
    /// Fail every drop while set
    fail_drop: RwLock<bool>,
    /// Fail every write to this container while set
    fail_container: RwLock<Option<ContainerRef>>,
}

impl Default for StubWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl StubWorld {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            inventories: RwLock::new(HashMap::new()),
            online: RwLock::new(HashSet::new()),
            notifications: RwLock::new(Vec::new()),
            drops: RwLock::new(Vec::new()),
            previews: RwLock::new(Vec::new()),
            relocations: RwLock::new(Vec::new()),
            fail_inventory: RwLock::new(false),
            fail_drop: RwLock::new(false),
            fail_container: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Replace a container's slots directly (simulates an actor editing it)
    pub fn put_container(&self, container: &ContainerRef, slots: Slots) {
        self.containers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container.clone(), slots);
    }

    pub fn put_inventory(&self, actor: ActorId, slots: Slots) {
        self.inventories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(actor, slots);
    }

    pub fn set_online(&self, actor: ActorId, online: bool) {
        let mut set = self.online.write().unwrap_or_else(|e| e.into_inner());
        if online {
            set.insert(actor);
        } else {
            set.remove(&actor);
        }
    }

    pub fn set_fail_inventory(&self, fail: bool) {
        *self.fail_inventory.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn set_fail_drop(&self, fail: bool) {
        *self.fail_drop.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn set_fail_container(&self, container: Option<ContainerRef>) {
        *self.fail_container.write().unwrap_or_else(|e| e.into_inner()) = container;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn container(&self, container: &ContainerRef) -> Slots {
        self.containers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(container)
            .cloned()
            .unwrap_or_else(|| vec![None; DEFAULT_SLOTS])
    }

    pub fn inventory_of(&self, actor: ActorId) -> Slots {
        self.inventories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&actor)
            .cloned()
            .unwrap_or_else(|| vec![None; DEFAULT_SLOTS])
    }

    pub fn notifications_for(&self, actor: ActorId) -> Vec<String> {
        self.notifications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(a, _)| *a == actor)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn dropped_for(&self, actor: ActorId) -> Vec<ItemStack> {
        self.drops
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(a, _)| *a == actor)
            .flat_map(|(_, items)| items.iter().cloned())
            .collect()
    }

    pub fn previews_for(&self, actor: ActorId) -> Vec<PreviewView> {
        self.previews
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|v| v.viewer == actor)
            .cloned()
            .collect()
    }

    pub fn relocations_for(&self, actor: ActorId) -> Vec<Location> {
        self.relocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(a, _)| *a == actor)
            .map(|(_, l)| l.clone())
            .collect()
    }

    fn inventory_failing(&self) -> bool {
        *self.fail_inventory.read().unwrap_or_else(|e| e.into_inner())
    }

    fn container_failing(&self, container: &ContainerRef) -> bool {
        self.fail_container
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            == Some(container)
    }
}

#[async_trait]
impl WorldPort for StubWorld {
    async fn container_contents(&self, container: &ContainerRef) -> Result<Slots, ExecError> {
        Ok(self.container(container))
    }

    async fn set_container_contents(
        &self,
        container: &ContainerRef,
        slots: Slots,
    ) -> Result<(), ExecError> {
        if self.container_failing(container) {
            return Err(ExecError::World(format!("Simulated write failure on {}", container)));
        }
        self.put_container(container, slots);
        Ok(())
    }

    async fn inventory(&self, actor: ActorId) -> Result<Slots, ExecError> {
        if self.inventory_failing() {
            return Err(ExecError::World("Simulated inventory failure".to_string()));
        }
        Ok(self.inventory_of(actor))
    }

    async fn set_inventory(&self, actor: ActorId, slots: Slots) -> Result<(), ExecError> {
        if self.inventory_failing() {
            return Err(ExecError::World("Simulated inventory failure".to_string()));
        }
        self.put_inventory(actor, slots);
        Ok(())
    }

    async fn is_actor_online(&self, actor: ActorId) -> bool {
        self.online
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&actor)
    }

    async fn drop_at_last_known_location(
        &self,
        actor: ActorId,
        items: Vec<ItemStack>,
    ) -> Result<(), ExecError> {
        if *self.fail_drop.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(ExecError::World("Simulated drop failure".to_string()));
        }
        tracing::debug!(%actor, stacks = items.len(), "Stub: items dropped");
        self.drops
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((actor, items));
        Ok(())
    }

    async fn notify(&self, actor: ActorId, message: &str) -> Result<(), ExecError> {
        self.notifications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((actor, message.to_string()));
        Ok(())
    }

    async fn show_preview(&self, actor: ActorId, view: &PreviewView) -> Result<(), ExecError> {
        if !self.is_actor_online(actor).await {
            return Err(ExecError::ActorOffline(actor));
        }
        self.previews
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(view.clone());
        Ok(())
    }

    async fn relocate(&self, actor: ActorId, location: &Location) -> Result<(), ExecError> {
        self.relocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((actor, location.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradepost_domain::ItemKind;

    #[tokio::test]
    async fn test_stub_container_roundtrip() {
        let world = StubWorld::new();
        let chest = ContainerRef("chest:north".to_string());
        assert_eq!(world.container_contents(&chest).await.unwrap().len(), DEFAULT_SLOTS);

        let slots = vec![Some(ItemStack::new(ItemKind::new("diamond", 64), 1).unwrap())];
        world.set_container_contents(&chest, slots.clone()).await.unwrap();
        assert_eq!(world.container(&chest), slots);
    }

    #[tokio::test]
    async fn test_stub_container_failure_is_targeted() {
        let world = StubWorld::new();
        let north = ContainerRef("chest:north".to_string());
        let south = ContainerRef("chest:south".to_string());
        world.set_fail_container(Some(north.clone()));

        assert!(world.set_container_contents(&north, vec![None]).await.is_err());
        assert!(world.set_container_contents(&south, vec![None]).await.is_ok());

        world.set_fail_container(None);
        assert!(world.set_container_contents(&north, vec![None]).await.is_ok());
    }

    #[tokio::test]
    async fn test_stub_records_side_effects() {
        let world = StubWorld::new();
        let actor = ActorId::generate();

        world.notify(actor, "hello").await.unwrap();
        world.set_fail_drop(true);
        assert!(world.drop_at_last_known_location(actor, vec![]).await.is_err());

        assert_eq!(world.notifications_for(actor), vec!["hello".to_string()]);
        assert!(world.dropped_for(actor).is_empty());
        assert!(!world.is_actor_online(actor).await);
    }
}
