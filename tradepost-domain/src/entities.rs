//! Domain Entities for Tradepost
//!
//! Entities with identity that outlive a single call: actor sessions,
//! endpoints, pending offline settlements and lost-and-found backlogs.

use crate::value_objects::{
    tally, ActorId, ActorRef, ContainerRef, EndpointName, ItemStack, Location,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Actor Session
// =============================================================================

/// A currently-known actor bound to a trade side.
///
/// `logout_at` absent means online; present means offline since that instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSession {
    pub actor: ActorRef,
    pub logout_at: Option<DateTime<Utc>>,
}

impl ActorSession {
    /// Create an online session
    pub fn new(actor: ActorRef) -> Self {
        Self {
            actor,
            logout_at: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.logout_at.is_none()
    }

    /// Record a disconnect. The first disconnect instant wins.
    pub fn mark_offline(&mut self, at: DateTime<Utc>) {
        if self.logout_at.is_none() {
            self.logout_at = Some(at);
        }
    }

    pub fn mark_online(&mut self) {
        self.logout_at = None;
    }

    /// Time spent offline so far, `None` while online
    pub fn offline_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.logout_at.map(|at| now - at)
    }

    /// True iff offline and `now >= logout_at + grace`.
    ///
    /// A deadline past the end of representable time never expires.
    pub fn grace_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.logout_at.and_then(|at| at.checked_add_signed(grace)) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A named, linkable exchange point owning one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: EndpointName,
    pub container: ContainerRef,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub linked: Option<EndpointName>,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(
        name: EndpointName,
        container: ContainerRef,
        location: Option<Location>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            container,
            location,
            linked: None,
            created_at,
        }
    }

    pub fn names(&self, other: &EndpointName) -> bool {
        self.linked.as_ref() == Some(other)
    }
}

/// How an endpoint's link looks from the registry's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum LinkState {
    /// No link recorded
    Unlinked,
    /// Both endpoints name each other
    Linked(EndpointName),
    /// One-sided, dangling or pointing through a third endpoint
    Inconsistent(EndpointName),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Unlinked => write!(f, "unlinked"),
            LinkState::Linked(partner) => write!(f, "linked to {}", partner),
            LinkState::Inconsistent(target) => write!(f, "inconsistent link to {}", target),
        }
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Why a trade side was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementReason {
    /// The actor stayed offline past the grace period
    SelfTimeout,
    /// The counterpart stayed offline past the grace period
    CounterpartTimeout,
    /// A party cancelled
    Cancelled,
    /// A party rejected the counterpart's offer
    Rejected,
    /// Both parties accepted and the offers were swapped
    Accepted,
    /// The session was found inconsistent and force-settled
    Error,
}

impl SettlementReason {
    /// User-facing explanation, delivered on settlement or next reconnect
    pub fn explain(&self) -> &'static str {
        match self {
            SettlementReason::SelfTimeout => {
                "Your trade was cancelled because you were offline too long. Your items were returned."
            },
            SettlementReason::CounterpartTimeout => {
                "Your trade was cancelled because your trading partner was offline too long. Your items were returned."
            },
            SettlementReason::Cancelled => "The trade was cancelled. Your items were returned.",
            SettlementReason::Rejected => "The trade was rejected. Your items were returned.",
            SettlementReason::Accepted => "The trade completed. You received your partner's offer.",
            SettlementReason::Error => {
                "The trade was stopped because its contents changed unexpectedly. Your items were returned."
            },
        }
    }

    /// Returning settlements give each side its own items back
    pub fn is_swap(&self) -> bool {
        matches!(self, SettlementReason::Accepted)
    }
}

impl fmt::Display for SettlementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementReason::SelfTimeout => "SELF_TIMEOUT",
            SettlementReason::CounterpartTimeout => "COUNTERPART_TIMEOUT",
            SettlementReason::Cancelled => "CANCELLED",
            SettlementReason::Rejected => "REJECTED",
            SettlementReason::Accepted => "ACCEPTED",
            SettlementReason::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// A settlement that resolved while its actor was offline.
///
/// Consumed when the actor reconnects and the notice is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSettlement {
    pub id: Uuid,
    pub actor: ActorRef,
    pub logout_at: Option<DateTime<Utc>>,
    pub reason: SettlementReason,
    /// Snapshot of what the actor was owed (already placed in lost-and-found)
    pub items: Vec<ItemStack>,
    pub endpoint: EndpointName,
    #[serde(default)]
    pub return_location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl OfflineSettlement {
    pub fn new(
        actor: ActorRef,
        logout_at: Option<DateTime<Utc>>,
        reason: SettlementReason,
        items: Vec<ItemStack>,
        endpoint: EndpointName,
        return_location: Option<Location>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor,
            logout_at,
            reason,
            items,
            endpoint,
            return_location,
            created_at,
        }
    }

    /// Message shown on reconnect
    pub fn notice(&self) -> String {
        if self.items.is_empty() {
            return format!("[{}] {}", self.endpoint, self.reason.explain());
        }
        let summary = tally(self.items.iter())
            .into_iter()
            .map(|(kind, amount)| format!("{} x{}", kind, amount))
            .collect::<Vec<_>>()
            .join(", ");
        format!("[{}] {} ({})", self.endpoint, self.reason.explain(), summary)
    }
}

// =============================================================================
// Lost and Found
// =============================================================================

/// Durable per-actor backlog of undeliverable items. Append-only until claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LostAndFound {
    pub actor: ActorId,
    pub items: Vec<ItemStack>,
    pub updated_at: DateTime<Utc>,
}

impl LostAndFound {
    pub fn new(actor: ActorId, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            items: Vec::new(),
            updated_at: now,
        }
    }

    /// Append to the backlog, never replacing what is already there
    pub fn append(&mut self, items: impl IntoIterator<Item = ItemStack>, now: DateTime<Utc>) {
        self.items.extend(items);
        self.updated_at = now;
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::ItemKind;
    use chrono::TimeZone;

    fn actor(name: &str) -> ActorRef {
        ActorRef::new(ActorId::generate(), name).unwrap()
    }

    #[test]
    fn test_actor_session_online_offline() {
        let mut session = ActorSession::new(actor("alice"));
        assert!(session.is_online());

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        session.mark_offline(t0);
        session.mark_offline(t0 + Duration::seconds(30));
        assert_eq!(session.logout_at, Some(t0));

        assert_eq!(session.offline_for(t0 + Duration::seconds(10)), Some(Duration::seconds(10)));

        session.mark_online();
        assert!(session.is_online());
        assert!(session.offline_for(t0).is_none());
    }

    #[test]
    fn test_grace_expiry_boundary() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let grace = Duration::seconds(60);
        let mut session = ActorSession::new(actor("bob"));
        session.mark_offline(t0);

        assert!(!session.grace_expired(t0 + grace - Duration::milliseconds(1), grace));
        assert!(session.grace_expired(t0 + grace, grace));
        assert!(session.grace_expired(t0 + grace + Duration::milliseconds(1), grace));
    }

    #[test]
    fn test_huge_grace_period_never_expires() {
        let mut session = ActorSession::new(actor("erin"));
        let t0 = Utc::now();
        session.mark_offline(t0);

        let grace = Duration::seconds(i64::MAX / 1000);
        assert!(!session.grace_expired(t0 + Duration::days(365), grace));
    }

    #[test]
    fn test_online_session_never_expires() {
        let session = ActorSession::new(actor("carol"));
        assert!(!session.grace_expired(Utc::now(), Duration::zero()));
    }

    #[test]
    fn test_lost_and_found_appends() {
        let kind = ItemKind::new("diamond", 64);
        let t0 = Utc::now();
        let mut backlog = LostAndFound::new(ActorId::generate(), t0);
        backlog.append(vec![ItemStack::new(kind.clone(), 3).unwrap()], t0);
        backlog.append(vec![ItemStack::new(kind, 4).unwrap()], t0 + Duration::seconds(5));

        assert_eq!(backlog.items.len(), 2);
        assert_eq!(backlog.items[0].amount, 3);
        assert_eq!(backlog.updated_at, t0 + Duration::seconds(5));
    }

    #[test]
    fn test_offline_settlement_notice_mentions_items() {
        let settlement = OfflineSettlement::new(
            actor("dave"),
            None,
            SettlementReason::SelfTimeout,
            vec![ItemStack::new(ItemKind::new("emerald", 64), 2).unwrap()],
            EndpointName::new("north").unwrap(),
            None,
            Utc::now(),
        );

        let notice = settlement.notice();
        assert!(notice.contains("offline too long"));
        assert!(notice.contains("emerald x2"));
    }

    #[test]
    fn test_reason_display_matches_serde() {
        let json = serde_json::to_string(&SettlementReason::CounterpartTimeout).unwrap();
        assert_eq!(json, "\"COUNTERPART_TIMEOUT\"");
        assert_eq!(SettlementReason::CounterpartTimeout.to_string(), "COUNTERPART_TIMEOUT");
    }
}
