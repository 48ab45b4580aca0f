//! World port definitions.
//!
//! The World owns every container and actor inventory. The core only ever
//! reads a snapshot and writes back whole contents, never holding a live
//! reference across an await.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tradepost_domain::{
    ActorId, ContainerRef, EndpointName, ItemStack, Location, SessionKey, Slots, TradeStatus,
};

use crate::error::ExecError;

// =============================================================================
// World Port
// =============================================================================

/// Port to the world that owns containers, inventories and actors.
///
/// Implementations:
/// - `StubWorld` - In-memory world for tests and the standalone daemon
#[async_trait]
pub trait WorldPort: Send + Sync {
    /// Ordered slots of a container.
    async fn container_contents(&self, container: &ContainerRef) -> Result<Slots, ExecError>;

    /// Replace a container's contents.
    async fn set_container_contents(
        &self,
        container: &ContainerRef,
        slots: Slots,
    ) -> Result<(), ExecError>;

    /// Ordered slots of an actor's inventory.
    async fn inventory(&self, actor: ActorId) -> Result<Slots, ExecError>;

    /// Replace an actor's inventory.
    async fn set_inventory(&self, actor: ActorId, slots: Slots) -> Result<(), ExecError>;

    async fn is_actor_online(&self, actor: ActorId) -> bool;

    /// Drop items where the actor was last seen.
    async fn drop_at_last_known_location(
        &self,
        actor: ActorId,
        items: Vec<ItemStack>,
    ) -> Result<(), ExecError>;

    /// Send a text message to an online actor.
    async fn notify(&self, actor: ActorId, message: &str) -> Result<(), ExecError>;

    /// Open the read-only decision view for an actor.
    async fn show_preview(&self, actor: ActorId, view: &PreviewView) -> Result<(), ExecError>;

    /// Move an actor, e.g. back out of a trade room after reconnecting.
    async fn relocate(&self, actor: ActorId, location: &Location) -> Result<(), ExecError>;
}

// =============================================================================
// Preview
// =============================================================================

/// Read-only decision view: the counterpart's locked offer plus the
/// accept/reject affordances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewView {
    pub key: SessionKey,
    pub viewer: ActorId,
    pub counterpart: String,
    /// Endpoint the offer sits in
    pub counterpart_endpoint: EndpointName,
    pub offer: Slots,
    /// The viewer already accepted
    pub accepted: bool,
    pub counterpart_accepted: bool,
    pub status: TradeStatus,
}

impl PreviewView {
    pub fn can_accept(&self) -> bool {
        !self.accepted
    }

    /// Rejecting is only possible before accepting
    pub fn can_reject(&self) -> bool {
        !self.accepted
    }
}

// =============================================================================
// Overflow policy
// =============================================================================

/// What happens to items that do not fit an online recipient's inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop at the actor's last known location
    #[default]
    Drop,
    /// Append to the actor's lost-and-found backlog
    LostAndFound,
}

impl FromStr for OverflowPolicy {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(OverflowPolicy::Drop),
            "lost_and_found" | "lost-and-found" => Ok(OverflowPolicy::LostAndFound),
            other => Err(ExecError::Config(format!(
                "unknown overflow policy '{}' (expected drop or lost_and_found)",
                other
            ))),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Drop => write!(f, "drop"),
            OverflowPolicy::LostAndFound => write!(f, "lost_and_found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("drop".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Drop);
        assert_eq!(
            "Lost-And-Found".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::LostAndFound
        );
        assert!("burn".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_preview_affordances() {
        let view = PreviewView {
            key: SessionKey::new(
                EndpointName::new("north").unwrap(),
                EndpointName::new("south").unwrap(),
            ),
            viewer: ActorId::generate(),
            counterpart: "bob".to_string(),
            counterpart_endpoint: EndpointName::new("south").unwrap(),
            offer: vec![None],
            accepted: true,
            counterpart_accepted: false,
            status: TradeStatus::Deciding,
        };
        assert!(!view.can_accept());
        assert!(!view.can_reject());

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["counterpart_endpoint"], "south");
    }
}
