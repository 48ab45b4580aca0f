//! Domain Events for Tradepost
//!
//! Immutable records of trade and registry changes.
//! Published on the daemon event bus and kept for audit.

use crate::entities::SettlementReason;
use crate::session::{SessionKey, TradeStatus};
use crate::value_objects::{ActorId, EndpointName, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain events for the trade lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    /// An actor took a side of a session
    SideClaimed {
        key: SessionKey,
        side: Side,
        actor_id: ActorId,
        status: TradeStatus,
        timestamp: DateTime<Utc>,
    },

    /// A side's offer was locked
    OfferLocked {
        key: SessionKey,
        side: Side,
        actor_id: ActorId,
        status: TradeStatus,
        timestamp: DateTime<Utc>,
    },

    /// Both offers locked; previews shown
    DecidingEntered {
        key: SessionKey,
        timestamp: DateTime<Utc>,
    },

    /// A side accepted the counterpart's offer
    OfferAccepted {
        key: SessionKey,
        side: Side,
        actor_id: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// The session closed
    Settled {
        key: SessionKey,
        /// Reason per settled actor
        reasons: Vec<(ActorId, SettlementReason)>,
        final_status: TradeStatus,
        timestamp: DateTime<Utc>,
    },

    /// An actor came online
    ActorConnected {
        actor_id: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// An actor went offline
    ActorDisconnected {
        actor_id: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// Endpoint created by an administrator
    EndpointCreated {
        name: EndpointName,
        timestamp: DateTime<Utc>,
    },

    /// Two endpoints were linked
    EndpointsLinked {
        a: EndpointName,
        b: EndpointName,
        /// Endpoints whose stale links were cleared first
        corrected: Vec<EndpointName>,
        timestamp: DateTime<Utc>,
    },

    /// Links were cleared
    EndpointUnlinked {
        name: EndpointName,
        cleared: Vec<EndpointName>,
        timestamp: DateTime<Utc>,
    },

    /// Endpoint removed
    EndpointDeleted {
        name: EndpointName,
        timestamp: DateTime<Utc>,
    },
}

impl TradeEvent {
    /// Short type name, for logs
    pub fn event_type(&self) -> &'static str {
        match self {
            TradeEvent::SideClaimed { .. } => "side_claimed",
            TradeEvent::OfferLocked { .. } => "offer_locked",
            TradeEvent::DecidingEntered { .. } => "deciding_entered",
            TradeEvent::OfferAccepted { .. } => "offer_accepted",
            TradeEvent::Settled { .. } => "settled",
            TradeEvent::ActorConnected { .. } => "actor_connected",
            TradeEvent::ActorDisconnected { .. } => "actor_disconnected",
            TradeEvent::EndpointCreated { .. } => "endpoint_created",
            TradeEvent::EndpointsLinked { .. } => "endpoints_linked",
            TradeEvent::EndpointUnlinked { .. } => "endpoint_unlinked",
            TradeEvent::EndpointDeleted { .. } => "endpoint_deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TradeEvent::DecidingEntered {
            key: SessionKey::new(
                EndpointName::new("north").unwrap(),
                EndpointName::new("south").unwrap(),
            ),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deciding_entered");
        assert_eq!(event.event_type(), "deciding_entered");
    }
}
