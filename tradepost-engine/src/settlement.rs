//! Settlement planning
//!
//! Turns a closed session (`Settlement`) plus the live container contents
//! into the list of deliveries the executor must perform. Every item in a
//! cleared container lands in exactly one delivery.

use chrono::{DateTime, Utc};
use tradepost_domain::{
    stacks_of, tally, ActorSession, ContainerRef, Endpoint, EndpointName, ItemStack, Location,
    SessionKey, Settlement, SettlementReason, Side, Slots, TradeStatus,
};

/// Items owed to one party.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipient: ActorSession,
    pub reason: SettlementReason,
    /// Endpoint whose container the items come from
    pub from: EndpointName,
    pub items: Vec<ItemStack>,
    /// Where the recipient stood when trading (their own endpoint)
    pub return_location: Option<Location>,
}

/// A container to empty after its contents were handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerClear {
    pub endpoint: EndpointName,
    pub container: ContainerRef,
    /// Slot count, so the cleared container keeps its shape
    pub size: usize,
}

/// What the executor has to do to settle a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub key: SessionKey,
    pub swap: bool,
    pub deliveries: Vec<Delivery>,
    /// Containers to clear once their contents are handed off
    pub clear: Vec<ContainerClear>,
    pub final_status: TradeStatus,
    /// When the session closed; stamps offline notices
    pub settled_at: DateTime<Utc>,
}

impl SettlementPlan {
    /// Total items moving, for logging
    pub fn item_count(&self) -> u64 {
        self.deliveries
            .iter()
            .flat_map(|d| d.items.iter())
            .map(|s| u64::from(s.amount))
            .sum()
    }
}

/// Build the delivery plan.
///
/// `endpoints` and `contents` are indexed by side (`contents` being the
/// current container snapshots). On a swap each party receives the other
/// side's container; otherwise its own.
pub fn plan_settlement(
    settlement: &Settlement,
    endpoints: [&Endpoint; 2],
    contents: &[Slots; 2],
    settled_at: DateTime<Utc>,
) -> SettlementPlan {
    let mut deliveries = Vec::with_capacity(settlement.parties.len());
    let mut clear: Vec<ContainerClear> = Vec::with_capacity(2);

    for party in &settlement.parties {
        let source = if settlement.swap {
            party.side.other()
        } else {
            party.side
        };
        let from = endpoints[source.index()];
        deliveries.push(Delivery {
            recipient: party.session.clone(),
            reason: party.reason,
            from: from.name.clone(),
            items: stacks_of(&contents[source.index()]),
            return_location: endpoints[party.side.index()].location.clone(),
        });
        if !clear.iter().any(|c| c.endpoint == from.name) {
            clear.push(ContainerClear {
                endpoint: from.name.clone(),
                container: from.container.clone(),
                size: contents[source.index()].len(),
            });
        }
    }

    SettlementPlan {
        key: settlement.key.clone(),
        swap: settlement.swap,
        deliveries,
        clear,
        final_status: settlement.final_status,
        settled_at,
    }
}

/// Compare each side's locked offer with its container's current contents.
///
/// Returns the sides whose contents no longer match what was locked.
pub fn verify_offers(settlement: &Settlement, contents: &[Slots; 2]) -> Vec<Side> {
    settlement
        .parties
        .iter()
        .filter(|party| {
            let actual = tally(contents[party.side.index()].iter().flatten());
            match &party.locked_offer {
                Some(offer) => tally(offer.iter().flatten()) != actual,
                None => true,
            }
        })
        .map(|party| party.side)
        .collect()
}

/// Turn a settlement into an ERROR return: no swap, each side gets its own
/// container back.
pub fn downgrade(settlement: &Settlement) -> Settlement {
    let mut downgraded = settlement.clone();
    downgraded.swap = false;
    for party in &mut downgraded.parties {
        party.reason = SettlementReason::Error;
    }
    downgraded
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tradepost_domain::{ActorId, ActorRef, ItemKind, SettlementParty};

    fn name(s: &str) -> EndpointName {
        EndpointName::new(s).unwrap()
    }

    fn slots(item: &str, amount: u32) -> Slots {
        vec![Some(ItemStack::new(ItemKind::new(item, 64), amount).unwrap()), None]
    }

    fn party(side: Side, who: &str, reason: SettlementReason, offer: Option<Slots>) -> SettlementParty {
        SettlementParty {
            side,
            session: ActorSession::new(ActorRef::new(ActorId::generate(), who).unwrap()),
            reason,
            locked_offer: offer,
        }
    }

    fn endpoints() -> [Endpoint; 2] {
        [
            Endpoint::new(
                name("north"),
                ContainerRef("chest:north".into()),
                Some(Location::new("overworld", 0.0, 64.0, 0.0)),
                Utc::now(),
            ),
            Endpoint::new(name("south"), ContainerRef("chest:south".into()), None, Utc::now()),
        ]
    }

    fn swap_settlement() -> Settlement {
        Settlement {
            key: SessionKey::new(name("north"), name("south")),
            swap: true,
            parties: vec![
                party(Side::One, "alice", SettlementReason::Accepted, Some(slots("diamond", 1))),
                party(Side::Two, "bob", SettlementReason::Accepted, Some(slots("emerald", 1))),
            ],
            final_status: TradeStatus::Settled,
        }
    }

    #[test]
    fn test_swap_plan_crosses_containers() {
        let settlement = swap_settlement();
        let contents = [slots("diamond", 1), slots("emerald", 1)];
        let [north, south] = endpoints();
        let plan = plan_settlement(&settlement, [&north, &south], &contents, Utc::now());

        assert_eq!(plan.deliveries.len(), 2);
        assert_eq!(plan.deliveries[0].recipient.actor.name, "alice");
        assert_eq!(plan.deliveries[0].from, name("south"));
        assert_eq!(plan.deliveries[0].return_location, north.location);
        assert_eq!(plan.deliveries[0].items, stacks_of(&slots("emerald", 1)));
        assert_eq!(plan.deliveries[1].items, stacks_of(&slots("diamond", 1)));
        assert_eq!(plan.clear.len(), 2);
        assert_eq!(plan.item_count(), 2);
    }

    #[test]
    fn test_lone_return_clears_only_own_container() {
        let settlement = Settlement {
            key: SessionKey::new(name("north"), name("south")),
            swap: false,
            parties: vec![party(Side::Two, "bob", SettlementReason::SelfTimeout, None)],
            final_status: TradeStatus::Empty,
        };
        let contents = [slots("dirt", 5), slots("emerald", 7)];
        let [north, south] = endpoints();
        let plan = plan_settlement(&settlement, [&north, &south], &contents, Utc::now());

        assert_eq!(plan.deliveries.len(), 1);
        assert_eq!(plan.deliveries[0].from, name("south"));
        assert_eq!(
            plan.clear,
            vec![ContainerClear {
                endpoint: name("south"),
                container: ContainerRef("chest:south".into()),
                size: 2,
            }]
        );
    }

    #[test]
    fn test_verify_offers_detects_tampering() {
        let settlement = swap_settlement();
        assert!(verify_offers(&settlement, &[slots("diamond", 1), slots("emerald", 1)]).is_empty());

        let tampered = [slots("diamond", 1), slots("emerald", 2)];
        assert_eq!(verify_offers(&settlement, &tampered), vec![Side::Two]);
    }

    #[test]
    fn test_verify_ignores_slot_layout() {
        let settlement = swap_settlement();
        let moved = [vec![None, slots("diamond", 1)[0].clone()], slots("emerald", 1)];
        assert!(verify_offers(&settlement, &moved).is_empty());
    }

    #[test]
    fn test_downgrade_returns_each_side() {
        let downgraded = downgrade(&swap_settlement());
        assert!(!downgraded.swap);
        assert!(downgraded.parties.iter().all(|p| p.reason == SettlementReason::Error));

        let [north, south] = endpoints();
        let plan = plan_settlement(
            &downgraded,
            [&north, &south],
            &[slots("diamond", 1), slots("emerald", 2)],
            Utc::now(),
        );
        assert_eq!(plan.deliveries[0].from, name("north"));
        assert_eq!(plan.deliveries[1].items, stacks_of(&slots("emerald", 2)));
    }
}
