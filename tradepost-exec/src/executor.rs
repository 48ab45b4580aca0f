//! Settlement executor: applies settlement plans against the World.
//!
//! The executor is the bridge between the pure engine (what has to move)
//! and the World (where items actually live).
//!
//! # Flow
//!
//! ```text
//! SettlementPlan → clear containers → per delivery:
//!     online  → transfer into inventory → leftover per overflow policy
//!     offline → lost-and-found + OfflineSettlement notice
//! ```
//!
//! Containers are cleared before anything is delivered, so a failed clear
//! leaves the items where they were and nothing is duplicated. Any delivery
//! that cannot complete falls back to the lost-and-found: items are never
//! silently discarded.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tradepost_domain::{ActorId, ActorRef, ItemStack, OfflineSettlement, SessionKey, Slots};
use tradepost_engine::{same_contents, transfer, Delivery, SettlementPlan};

use crate::error::{ExecError, ExecResult};
use crate::ports::{OverflowPolicy, WorldPort};

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub actor: ActorRef,
    /// Items placed into the actor's inventory
    pub moved: u64,
    /// Items dropped at the actor's last known location
    pub dropped: Vec<ItemStack>,
    /// Items the caller must append to the actor's lost-and-found
    pub lost_and_found: Vec<ItemStack>,
    /// Notice to deliver when the actor reconnects
    pub offline: Option<OfflineSettlement>,
}

/// Result of applying a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub key: SessionKey,
    pub deliveries: Vec<DeliveryOutcome>,
}

impl SettlementOutcome {
    /// Per-actor lost-and-found additions
    pub fn lost_and_found(&self) -> impl Iterator<Item = (ActorId, &[ItemStack])> {
        self.deliveries
            .iter()
            .filter(|d| !d.lost_and_found.is_empty())
            .map(|d| (d.actor.id, d.lost_and_found.as_slice()))
    }

    pub fn offline_settlements(&self) -> impl Iterator<Item = &OfflineSettlement> {
        self.deliveries.iter().filter_map(|d| d.offline.as_ref())
    }
}

/// Result of claiming a lost-and-found backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimResult {
    pub moved: u64,
    /// What is still owed; stays in the backlog
    pub remaining: Vec<ItemStack>,
}

// =============================================================================
// Executor
// =============================================================================

/// Applies settlement plans and backlog claims.
pub struct SettlementExecutor<W: WorldPort> {
    world: Arc<W>,
    overflow: OverflowPolicy,
}

impl<W: WorldPort> SettlementExecutor<W> {
    pub fn new(world: Arc<W>, overflow: OverflowPolicy) -> Self {
        Self { world, overflow }
    }

    pub fn world(&self) -> &Arc<W> {
        &self.world
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Apply a plan.
    ///
    /// # Errors
    /// Fails if a container cannot be cleared or no longer holds what the
    /// plan delivers from it. Containers cleared before the failure are
    /// restored, so the items stay where they were.
    pub async fn apply(&self, plan: &SettlementPlan) -> ExecResult<SettlementOutcome> {
        self.clear_containers(plan).await?;

        let mut deliveries = Vec::with_capacity(plan.deliveries.len());
        for delivery in &plan.deliveries {
            deliveries.push(self.deliver(delivery, plan.settled_at).await);
        }

        info!(
            key = %plan.key,
            swap = plan.swap,
            items = plan.item_count(),
            final_status = %plan.final_status,
            "Settlement applied"
        );

        Ok(SettlementOutcome {
            key: plan.key.clone(),
            deliveries,
        })
    }

    async fn clear_containers(&self, plan: &SettlementPlan) -> ExecResult<()> {
        let mut cleared: Vec<(usize, Slots)> = Vec::new();

        for (index, target) in plan.clear.iter().enumerate() {
            let previous = match self.world.container_contents(&target.container).await {
                Ok(previous) => previous,
                Err(e) => {
                    self.restore_cleared(plan, cleared).await;
                    return Err(e);
                },
            };

            // The plan was built from an earlier read; anything that changed
            // since would be wiped without being delivered.
            let planned = plan
                .deliveries
                .iter()
                .filter(|d| d.from == target.endpoint)
                .flat_map(|d| d.items.iter());
            if !same_contents(previous.iter().flatten(), planned) {
                warn!(endpoint = %target.endpoint, "Container changed since planning, restoring");
                self.restore_cleared(plan, cleared).await;
                return Err(ExecError::ContentsChanged(target.endpoint.clone()));
            }

            if let Err(e) = self
                .world
                .set_container_contents(&target.container, vec![None; target.size])
                .await
            {
                warn!(endpoint = %target.endpoint, error = %e, "Container clear failed, restoring");
                self.restore_cleared(plan, cleared).await;
                return Err(e);
            }
            cleared.push((index, previous));
        }
        Ok(())
    }

    async fn restore_cleared(&self, plan: &SettlementPlan, cleared: Vec<(usize, Slots)>) {
        for (done, slots) in cleared {
            let restore = &plan.clear[done];
            if let Err(e) = self.world.set_container_contents(&restore.container, slots).await {
                warn!(endpoint = %restore.endpoint, error = %e, "Container restore failed");
            }
        }
    }

    async fn deliver(&self, delivery: &Delivery, settled_at: DateTime<Utc>) -> DeliveryOutcome {
        let actor = delivery.recipient.actor.clone();
        let mut outcome = DeliveryOutcome {
            actor: actor.clone(),
            moved: 0,
            dropped: Vec::new(),
            lost_and_found: Vec::new(),
            offline: None,
        };

        let online = delivery.recipient.is_online() && self.world.is_actor_online(actor.id).await;
        if !online {
            debug!(actor_id = %actor.id, reason = %delivery.reason, "Recipient offline, deferring");
            outcome.lost_and_found = delivery.items.clone();
            outcome.offline = Some(OfflineSettlement::new(
                actor,
                delivery.recipient.logout_at,
                delivery.reason,
                delivery.items.clone(),
                delivery.from.clone(),
                delivery.return_location.clone(),
                settled_at,
            ));
            return outcome;
        }

        if !delivery.items.is_empty() {
            match self.place(actor.id, &delivery.items).await {
                Ok(claim) => {
                    outcome.moved = claim.moved;
                    if !claim.remaining.is_empty() {
                        self.dispose_leftover(actor.id, claim.remaining, &mut outcome).await;
                    }
                },
                Err(e) => {
                    warn!(actor_id = %actor.id, error = %e, "Inventory delivery failed, using lost-and-found");
                    outcome.lost_and_found = delivery.items.clone();
                },
            }
        }

        let mut message = format!("[{}] {}", delivery.from, delivery.reason.explain());
        if !outcome.lost_and_found.is_empty() {
            message.push_str(" Some items are waiting in your lost-and-found.");
        }
        if let Err(e) = self.world.notify(actor.id, &message).await {
            warn!(actor_id = %actor.id, error = %e, "Notification failed");
        }

        outcome
    }

    async fn dispose_leftover(
        &self,
        actor: ActorId,
        leftover: Vec<ItemStack>,
        outcome: &mut DeliveryOutcome,
    ) {
        match self.overflow {
            OverflowPolicy::Drop => {
                match self.world.drop_at_last_known_location(actor, leftover.clone()).await {
                    Ok(()) => {
                        debug!(actor_id = %actor, stacks = leftover.len(), "Leftover dropped");
                        outcome.dropped = leftover;
                    },
                    Err(e) => {
                        warn!(actor_id = %actor, error = %e, "Drop failed, using lost-and-found");
                        outcome.lost_and_found.extend(leftover);
                    },
                }
            },
            OverflowPolicy::LostAndFound => outcome.lost_and_found.extend(leftover),
        }
    }

    /// Transfer loose stacks into an actor's inventory.
    async fn place(&self, actor: ActorId, items: &[ItemStack]) -> ExecResult<ClaimResult> {
        let inventory = self.world.inventory(actor).await?;
        let result = transfer(items, inventory);
        if !result.is_complete() {
            debug!(actor_id = %actor, leftover = result.leftover.len(), "Inventory full");
        }
        self.world.set_inventory(actor, result.inventory).await?;
        Ok(ClaimResult {
            moved: result.moved,
            remaining: result.leftover,
        })
    }

    /// Move as much of a lost-and-found backlog as fits into the actor's
    /// inventory. Nothing is dropped: the remainder stays owed.
    pub async fn claim_backlog(&self, actor: ActorId, backlog: &[ItemStack]) -> ExecResult<ClaimResult> {
        if backlog.is_empty() {
            return Ok(ClaimResult {
                moved: 0,
                remaining: Vec::new(),
            });
        }
        let claim = self.place(actor, backlog).await?;
        info!(actor_id = %actor, moved = claim.moved, remaining = claim.remaining.len(), "Backlog claimed");
        Ok(claim)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubWorld;
    use tradepost_domain::{
        stacks_of, tally, ActorSession, ContainerRef, Endpoint, EndpointName, ItemKind, Location,
        SettlementParty, SettlementReason, Settlement, Side, TradeStatus,
    };
    use tradepost_engine::plan_settlement;

    struct Fixture {
        world: Arc<StubWorld>,
        north: Endpoint,
        south: Endpoint,
        alice: ActorRef,
        bob: ActorRef,
    }

    fn stack(id: &str, amount: u32) -> Option<ItemStack> {
        Some(ItemStack::new(ItemKind::new(id, 64), amount).unwrap())
    }

    fn fixture() -> Fixture {
        let world = Arc::new(StubWorld::new());
        let north = Endpoint::new(
            EndpointName::new("north").unwrap(),
            ContainerRef("chest:north".into()),
            Some(Location::new("overworld", 10.0, 64.0, 10.0)),
            Utc::now(),
        );
        let south = Endpoint::new(
            EndpointName::new("south").unwrap(),
            ContainerRef("chest:south".into()),
            None,
            Utc::now(),
        );
        let alice = ActorRef::new(ActorId::generate(), "alice").unwrap();
        let bob = ActorRef::new(ActorId::generate(), "bob").unwrap();
        world.set_online(alice.id, true);
        world.set_online(bob.id, true);
        world.put_container(&north.container, vec![stack("diamond", 1), None]);
        world.put_container(&south.container, vec![stack("emerald", 1), None]);
        world.put_inventory(alice.id, vec![None, None]);
        world.put_inventory(bob.id, vec![None, None]);
        Fixture {
            world,
            north,
            south,
            alice,
            bob,
        }
    }

    fn settlement(f: &Fixture, swap: bool, reason: SettlementReason) -> Settlement {
        Settlement {
            key: tradepost_domain::SessionKey::new(f.north.name.clone(), f.south.name.clone()),
            swap,
            parties: vec![
                SettlementParty {
                    side: Side::One,
                    session: ActorSession::new(f.alice.clone()),
                    reason,
                    locked_offer: None,
                },
                SettlementParty {
                    side: Side::Two,
                    session: ActorSession::new(f.bob.clone()),
                    reason,
                    locked_offer: None,
                },
            ],
            final_status: TradeStatus::Settled,
        }
    }

    async fn plan(f: &Fixture, settlement: &Settlement) -> SettlementPlan {
        let contents = [
            f.world.container(&f.north.container),
            f.world.container(&f.south.container),
        ];
        plan_settlement(settlement, [&f.north, &f.south], &contents, Utc::now())
    }

    #[tokio::test]
    async fn test_swap_delivers_crosswise_and_clears() {
        let f = fixture();
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;

        let outcome = executor.apply(&plan).await.unwrap();

        assert_eq!(f.world.inventory_of(f.alice.id)[0], stack("emerald", 1));
        assert_eq!(f.world.inventory_of(f.bob.id)[0], stack("diamond", 1));
        assert!(f.world.container(&f.north.container).iter().all(Option::is_none));
        assert!(f.world.container(&f.south.container).iter().all(Option::is_none));
        assert_eq!(outcome.lost_and_found().count(), 0);
        assert!(f.world.notifications_for(f.alice.id)[0].contains("completed"));
    }

    #[tokio::test]
    async fn test_offline_recipient_goes_to_lost_and_found() {
        let f = fixture();
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let mut settlement = settlement(&f, false, SettlementReason::Cancelled);
        settlement.parties[0].session.mark_offline(Utc::now());
        settlement.parties[0].reason = SettlementReason::SelfTimeout;
        let plan = plan(&f, &settlement).await;

        let outcome = executor.apply(&plan).await.unwrap();

        let owed: Vec<_> = outcome.lost_and_found().collect();
        assert_eq!(owed.len(), 1);
        assert_eq!(owed[0].0, f.alice.id);
        let notice = outcome.offline_settlements().next().unwrap();
        assert_eq!(notice.reason, SettlementReason::SelfTimeout);
        assert_eq!(notice.return_location, f.north.location);
        assert_eq!(notice.created_at, plan.settled_at);
        assert!(f.world.notifications_for(f.alice.id).is_empty());
        // Bob got his own emerald back
        assert_eq!(f.world.inventory_of(f.bob.id)[0], stack("emerald", 1));
    }

    #[tokio::test]
    async fn test_leftover_policy() {
        for policy in [OverflowPolicy::Drop, OverflowPolicy::LostAndFound] {
            let f = fixture();
            f.world.put_inventory(f.alice.id, vec![stack("dirt", 64)]);
            let executor = SettlementExecutor::new(f.world.clone(), policy);
            let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;

            let outcome = executor.apply(&plan).await.unwrap();
            let alice = &outcome.deliveries[0];
            match policy {
                OverflowPolicy::Drop => {
                    assert_eq!(f.world.dropped_for(f.alice.id), stacks_of(&[stack("emerald", 1)]));
                    assert!(alice.lost_and_found.is_empty());
                },
                OverflowPolicy::LostAndFound => {
                    assert!(f.world.dropped_for(f.alice.id).is_empty());
                    assert_eq!(alice.lost_and_found, stacks_of(&[stack("emerald", 1)]));
                },
            }
        }
    }

    #[tokio::test]
    async fn test_failed_drop_falls_back_to_lost_and_found() {
        let f = fixture();
        f.world.put_inventory(f.alice.id, vec![stack("dirt", 64)]);
        f.world.set_fail_drop(true);
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;

        let outcome = executor.apply(&plan).await.unwrap();
        assert_eq!(outcome.deliveries[0].lost_and_found.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_clear_restores_and_moves_nothing() {
        let f = fixture();
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;
        let north_before = f.world.container(&f.north.container);

        // North clears first, then south fails
        f.world.set_fail_container(Some(f.south.container.clone()));
        assert!(executor.apply(&plan).await.is_err());

        assert_eq!(f.world.container(&f.north.container), north_before);
        assert_eq!(f.world.container(&f.south.container)[0], stack("emerald", 1));
        assert!(f.world.inventory_of(f.alice.id).iter().all(Option::is_none));
        assert!(f.world.inventory_of(f.bob.id).iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_container_changed_after_planning_moves_nothing() {
        let f = fixture();
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let mut lone = settlement(&f, false, SettlementReason::Cancelled);
        lone.parties.truncate(1);
        lone.final_status = TradeStatus::Empty;
        let plan = plan(&f, &lone).await;

        // Alice adds gold to her chest before the executor gets to it
        f.world.put_container(&f.north.container, vec![stack("diamond", 1), stack("gold", 7)]);

        let err = executor.apply(&plan).await.unwrap_err();
        assert_eq!(err, ExecError::ContentsChanged(f.north.name.clone()));
        assert_eq!(
            f.world.container(&f.north.container),
            vec![stack("diamond", 1), stack("gold", 7)]
        );
        assert!(f.world.inventory_of(f.alice.id).iter().all(Option::is_none));
        assert!(f.world.dropped_for(f.alice.id).is_empty());
    }

    #[tokio::test]
    async fn test_later_container_change_restores_earlier_clear() {
        let f = fixture();
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;
        let north_before = f.world.container(&f.north.container);

        f.world.put_container(&f.south.container, vec![stack("emerald", 2), None]);

        assert!(executor.apply(&plan).await.is_err());
        assert_eq!(f.world.container(&f.north.container), north_before);
        assert_eq!(f.world.container(&f.south.container)[0], stack("emerald", 2));
        assert!(f.world.inventory_of(f.bob.id).iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_settlement_conserves_items() {
        let f = fixture();
        f.world.put_inventory(f.alice.id, vec![stack("emerald", 63)]);
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::LostAndFound);
        let plan = plan(&f, &settlement(&f, true, SettlementReason::Accepted)).await;

        let mut before = stacks_of(&f.world.container(&f.north.container));
        before.extend(stacks_of(&f.world.container(&f.south.container)));
        before.extend(stacks_of(&f.world.inventory_of(f.alice.id)));
        before.extend(stacks_of(&f.world.inventory_of(f.bob.id)));

        let outcome = executor.apply(&plan).await.unwrap();

        let mut after = stacks_of(&f.world.container(&f.north.container));
        after.extend(stacks_of(&f.world.container(&f.south.container)));
        after.extend(stacks_of(&f.world.inventory_of(f.alice.id)));
        after.extend(stacks_of(&f.world.inventory_of(f.bob.id)));
        for (_, items) in outcome.lost_and_found() {
            after.extend(items.iter().cloned());
        }

        assert_eq!(tally(&before), tally(&after));
    }

    #[tokio::test]
    async fn test_claim_backlog_keeps_remainder() {
        let f = fixture();
        f.world.put_inventory(f.alice.id, vec![None]);
        let executor = SettlementExecutor::new(f.world.clone(), OverflowPolicy::Drop);
        let backlog = stacks_of(&[stack("gold", 64), stack("iron", 5)]);

        let claim = executor.claim_backlog(f.alice.id, &backlog).await.unwrap();
        assert_eq!(claim.moved, 64);
        assert_eq!(claim.remaining, stacks_of(&[stack("iron", 5)]));
        assert!(f.world.dropped_for(f.alice.id).is_empty());
    }
}
