//! Read models returned by the coordinator.
//!
//! Plain serializable snapshots: nothing here borrows coordinator state, so a
//! view can be handed to the API layer after the lock is released.

use serde::{Deserialize, Serialize};
use tradepost_domain::{
    ActorId, ContainerRef, Endpoint, EndpointName, ItemStack, LinkState, Location, SessionKey,
    Side, Slots, TradeSession, TradeStatus,
};

/// Result of a coordinator call plus any persistence warnings.
///
/// In-memory state is authoritative: a failed write never fails the call,
/// it is reported here instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub result: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> Reply<T> {
    pub fn new(result: T, warnings: Vec<String>) -> Self {
        Self { result, warnings }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Where a trade stands after a transition, with a user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub key: SessionKey,
    pub status: TradeStatus,
    pub message: String,
}

/// One side of an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub side: Side,
    pub endpoint: EndpointName,
    pub actor_id: ActorId,
    pub actor: String,
    pub online: bool,
    pub locked: bool,
    pub accepted: bool,
}

/// An active session, as listed by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub status: TradeStatus,
    pub waiting_on: String,
    pub sides: Vec<SideSummary>,
}

impl SessionSummary {
    pub fn of(session: &TradeSession) -> Self {
        let sides = session
            .populated_sides()
            .into_iter()
            .filter_map(|side| {
                let state = session.side(side);
                state.actor.as_ref().map(|actor| SideSummary {
                    side,
                    endpoint: session.key.endpoint(side).clone(),
                    actor_id: actor.actor.id,
                    actor: actor.actor.name.clone(),
                    online: actor.is_online(),
                    locked: state.is_locked(),
                    accepted: state.accepted,
                })
            })
            .collect();

        Self {
            key: session.key.clone(),
            status: session.status(),
            waiting_on: session.waiting_on(),
            sides,
        }
    }
}

/// What `info <endpoint>` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub name: EndpointName,
    pub container: ContainerRef,
    pub location: Option<Location>,
    pub link: LinkState,
    /// Status of the trade using this endpoint, if any
    pub trade: Option<TradeStatus>,
}

impl EndpointInfo {
    pub fn new(endpoint: &Endpoint, link: LinkState, trade: Option<TradeStatus>) -> Self {
        Self {
            name: endpoint.name.clone(),
            container: endpoint.container.clone(),
            location: endpoint.location.clone(),
            link,
            trade,
        }
    }
}

/// An endpoint found by `find <radius>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyEndpoint {
    pub distance: f64,
    pub endpoint: EndpointInfo,
}

/// The caller's own side of a trade, for populating the offer view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferView {
    pub key: SessionKey,
    pub side: Side,
    pub endpoint: EndpointName,
    pub status: TradeStatus,
    /// Locked snapshot once locked, live container contents before
    pub offer: Slots,
    pub locked: bool,
}

/// Whether an actor may touch an endpoint's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "access", content = "reason", rename_all = "snake_case")]
pub enum ContainerAccess {
    /// Own side, still preparing
    Editable,
    /// Own side after locking
    ReadOnly,
    Denied(String),
}

impl ContainerAccess {
    pub fn can_open(&self) -> bool {
        !matches!(self, ContainerAccess::Denied(_))
    }

    pub fn can_modify(&self) -> bool {
        matches!(self, ContainerAccess::Editable)
    }
}

/// What happened when an actor came online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReport {
    pub actor_id: ActorId,
    /// Trade the actor resumed, if any
    pub resumed: Option<SessionKey>,
    /// Offline settlement notices delivered
    pub notices: Vec<String>,
    pub relocated_to: Option<Location>,
    pub claim: ClaimSummary,
}

/// What happened when an actor went offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectReport {
    pub actor_id: ActorId,
    pub key: Option<SessionKey>,
    /// Set when the immediate sweep settled the trade
    pub settled: Option<TradeUpdate>,
}

/// Outcome of claiming a lost-and-found backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub moved: u64,
    /// Still owed; stays in the backlog
    pub remaining: Vec<ItemStack>,
}

/// Outcome of one reconciler sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: Vec<SessionKey>,
    pub failures: usize,
    pub expired_confirmations: usize,
    pub warnings: Vec<String>,
}

/// What startup recovery loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub endpoints: usize,
    pub sessions: usize,
    pub settlements: usize,
    pub backlogs: usize,
    /// Records that failed to decode or no longer make sense
    pub skipped: usize,
    /// Seconds between the recorded stop and this startup
    pub downtime_secs: Option<i64>,
    pub warnings: Vec<String>,
}
