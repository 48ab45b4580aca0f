//! End-to-end trade flows through the coordinator.
//!
//! Drives the full stack (registry, session state machine, settlement
//! planning, executor) against the stub World and the in-memory store.
//!
//! Run with: `cargo test -p tradepostd --test trade_flow_e2e`

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tradepost_domain::{
    tally, ActorId, ActorRef, ContainerRef, EndpointName, ItemKind, ItemStack, LinkState,
    ManualClock, SessionKey, Side, Slots, TradeEvent, TradeStatus,
};
use tradepost_exec::StubWorld;
use tradepost_store::MemoryStore;
use tradepostd::{Coordinator, DaemonError, DaemonEvent, EventBus, EventReceiver, TradeConfig};

struct Fixture {
    coordinator: Coordinator<StubWorld, MemoryStore>,
    world: Arc<StubWorld>,
    events: EventReceiver,
    alice: ActorRef,
    bob: ActorRef,
}

fn name(s: &str) -> EndpointName {
    EndpointName::new(s).unwrap()
}

fn chest(endpoint: &str) -> ContainerRef {
    ContainerRef(format!("chest:{}", endpoint))
}

fn stack(id: &str, amount: u32) -> Option<ItemStack> {
    Some(ItemStack::new(ItemKind::new(id, 64), amount).unwrap())
}

fn key() -> SessionKey {
    SessionKey::new(name("north"), name("south"))
}

async fn fixture() -> Fixture {
    let world = Arc::new(StubWorld::new());
    let event_bus = Arc::new(EventBus::new(1000));
    let events = event_bus.subscribe();
    let mut coordinator = Coordinator::new(
        world.clone(),
        Arc::new(MemoryStore::new()),
        event_bus,
        Arc::new(ManualClock::new(Utc::now())),
        TradeConfig::default(),
    );

    for endpoint in ["north", "south"] {
        coordinator
            .create_endpoint(name(endpoint), chest(endpoint), None)
            .await
            .unwrap();
    }
    coordinator
        .link_endpoints(&name("north"), &name("south"))
        .await
        .unwrap();

    let alice = ActorRef::new(ActorId::generate(), "alice").unwrap();
    let bob = ActorRef::new(ActorId::generate(), "bob").unwrap();
    world.set_online(alice.id, true);
    world.set_online(bob.id, true);

    Fixture {
        coordinator,
        world,
        events,
        alice,
        bob,
    }
}

/// Alice at north offering a diamond, Bob at south offering an emerald,
/// both locked.
async fn deciding(f: &mut Fixture) {
    f.coordinator.begin_use(f.alice.clone(), &name("north")).await.unwrap();
    f.coordinator.begin_use(f.bob.clone(), &name("south")).await.unwrap();
    f.world.put_container(&chest("north"), vec![stack("diamond", 1), None]);
    f.world.put_container(&chest("south"), vec![stack("emerald", 1), None]);
    f.coordinator.declare_locked(f.alice.id).await.unwrap();
    f.coordinator.declare_locked(f.bob.id).await.unwrap();
    assert_eq!(f.coordinator.status_of(&key()), TradeStatus::Deciding);
}

/// Everything the two actors own across containers and inventories.
fn holdings(f: &Fixture) -> BTreeMap<ItemKind, u64> {
    let mut slots: Slots = Vec::new();
    slots.extend(f.world.container(&chest("north")));
    slots.extend(f.world.container(&chest("south")));
    slots.extend(f.world.inventory_of(f.alice.id));
    slots.extend(f.world.inventory_of(f.bob.id));
    for actor in [f.alice.id, f.bob.id] {
        if let Some(backlog) = f.coordinator.backlog(actor) {
            slots.extend(backlog.items.iter().cloned().map(Some));
        }
    }
    tally(slots.iter().flatten())
}

fn drain(events: &mut EventReceiver) -> Vec<DaemonEvent> {
    let mut out = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_north_south_swap() {
    let mut f = fixture().await;

    let opened = f.coordinator.begin_use(f.alice.clone(), &name("north")).await.unwrap();
    assert_eq!(opened.result.status, TradeStatus::WaitingForSecond);
    let paired = f.coordinator.begin_use(f.bob.clone(), &name("south")).await.unwrap();
    assert_eq!(paired.result.status, TradeStatus::Preparing);

    f.world.put_container(&chest("north"), vec![stack("diamond", 1), None]);
    f.world.put_container(&chest("south"), vec![stack("emerald", 1), None]);

    let locked = f.coordinator.declare_locked(f.alice.id).await.unwrap();
    assert_eq!(locked.result.status, TradeStatus::Locked(Side::One));
    let both = f.coordinator.declare_locked(f.bob.id).await.unwrap();
    assert_eq!(both.result.status, TradeStatus::Deciding);

    let first = f.coordinator.decide(f.alice.id, true).await.unwrap();
    assert_eq!(first.result.status, TradeStatus::Accepted(Side::One));
    let done = f.coordinator.decide(f.bob.id, true).await.unwrap();
    assert_eq!(done.result.status, TradeStatus::Settled);

    assert_eq!(f.world.inventory_of(f.alice.id).iter().flatten().count(), 1);
    assert!(f.world.inventory_of(f.alice.id).contains(&stack("emerald", 1)));
    assert_eq!(f.world.inventory_of(f.bob.id).iter().flatten().count(), 1);
    assert!(f.world.inventory_of(f.bob.id).contains(&stack("diamond", 1)));
    assert!(f.world.container(&chest("north")).iter().all(Option::is_none));
    assert!(f.world.container(&chest("south")).iter().all(Option::is_none));

    assert_eq!(f.coordinator.session_count(), 0);
    assert_eq!(f.coordinator.status_of(&key()), TradeStatus::Empty);
    assert!(f.coordinator.session_of(f.alice.id).is_none());
}

#[tokio::test]
async fn test_deciding_entered_exactly_once() {
    let mut f = fixture().await;
    deciding(&mut f).await;

    // A duplicate lock after DECIDING changes nothing
    let again = f.coordinator.declare_locked(f.alice.id).await;
    assert!(matches!(again, Err(DaemonError::Precondition { .. })));

    let entered = drain(&mut f.events)
        .into_iter()
        .filter(|e| matches!(e, DaemonEvent::Trade(TradeEvent::DecidingEntered { .. })))
        .count();
    assert_eq!(entered, 1);

    assert_eq!(f.world.previews_for(f.alice.id).len(), 1);
    assert_eq!(f.world.previews_for(f.bob.id).len(), 1);
    assert_eq!(f.world.previews_for(f.alice.id)[0].offer[0], stack("emerald", 1));
}

#[tokio::test]
async fn test_double_accept_is_precondition_error() {
    let mut f = fixture().await;
    deciding(&mut f).await;

    f.coordinator.decide(f.alice.id, true).await.unwrap();
    let err = f.coordinator.decide(f.alice.id, true).await.unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Precondition {
            status: TradeStatus::Accepted(Side::One),
            ..
        }
    ));
    assert_eq!(f.coordinator.status_of(&key()), TradeStatus::Accepted(Side::One));

    // Once the trade settled, a late duplicate finds no trade at all
    f.coordinator.decide(f.bob.id, true).await.unwrap();
    assert!(matches!(
        f.coordinator.decide(f.bob.id, true).await,
        Err(DaemonError::NotTrading(_))
    ));
    assert!(f.world.inventory_of(f.alice.id).contains(&stack("emerald", 1)));
}

#[tokio::test]
async fn test_reject_returns_own_items() {
    let mut f = fixture().await;
    deciding(&mut f).await;
    let before = holdings(&f);

    let rejected = f.coordinator.decide(f.bob.id, false).await.unwrap();
    assert_eq!(rejected.result.status, TradeStatus::Settled);

    assert!(f.world.inventory_of(f.alice.id).contains(&stack("diamond", 1)));
    assert!(f.world.inventory_of(f.bob.id).contains(&stack("emerald", 1)));
    assert_eq!(holdings(&f), before);
}

#[tokio::test]
async fn test_cancel_before_lock_returns_items() {
    let mut f = fixture().await;
    f.coordinator.begin_use(f.alice.clone(), &name("north")).await.unwrap();
    f.world.put_container(&chest("north"), vec![stack("gold", 12), None]);

    let cancelled = f.coordinator.cancel(f.alice.id).await.unwrap();
    assert_eq!(cancelled.result.status, TradeStatus::Empty);
    assert!(f.world.inventory_of(f.alice.id).contains(&stack("gold", 12)));
    assert_eq!(f.coordinator.session_count(), 0);
}

#[tokio::test]
async fn test_items_conserved_across_swap() {
    let mut f = fixture().await;
    f.world.put_inventory(f.alice.id, vec![stack("dirt", 64), None, None]);
    f.coordinator.begin_use(f.alice.clone(), &name("north")).await.unwrap();
    f.coordinator.begin_use(f.bob.clone(), &name("south")).await.unwrap();
    f.world.put_container(&chest("north"), vec![stack("diamond", 3), stack("iron", 20)]);
    f.world.put_container(&chest("south"), vec![stack("emerald", 64), stack("emerald", 10)]);
    f.coordinator.declare_locked(f.alice.id).await.unwrap();
    f.coordinator.declare_locked(f.bob.id).await.unwrap();

    let before = holdings(&f);
    f.coordinator.decide(f.alice.id, true).await.unwrap();
    f.coordinator.decide(f.bob.id, true).await.unwrap();

    assert_eq!(holdings(&f), before);
    let alice_has = tally(f.world.inventory_of(f.alice.id).iter().flatten());
    assert_eq!(alice_has.get(&ItemKind::new("emerald", 64)), Some(&74));
}

#[tokio::test]
async fn test_tampered_offer_returns_items_with_error() {
    let mut f = fixture().await;
    deciding(&mut f).await;

    // North's container changed after locking
    f.world.put_container(&chest("north"), vec![stack("dirt", 1), None]);
    f.coordinator.decide(f.alice.id, true).await.unwrap();
    let done = f.coordinator.decide(f.bob.id, true).await.unwrap();
    assert_eq!(done.result.status, TradeStatus::Settled);

    // No swap: each side gets its own container back
    assert!(f.world.inventory_of(f.alice.id).contains(&stack("dirt", 1)));
    assert!(f.world.inventory_of(f.bob.id).contains(&stack("emerald", 1)));
    assert!(!f.world.inventory_of(f.bob.id).contains(&stack("dirt", 1)));
    assert!(f.world.notifications_for(f.bob.id).iter().any(|n| n.contains("changed unexpectedly")));
}

#[tokio::test]
async fn test_link_is_symmetric_and_unlink_clears_both() {
    let mut f = fixture().await;

    let registry = f.coordinator.registry();
    assert_eq!(registry.link_state(&name("north")).unwrap(), LinkState::Linked(name("south")));
    assert_eq!(registry.link_state(&name("south")).unwrap(), LinkState::Linked(name("north")));

    f.coordinator
        .create_endpoint(name("west"), chest("west"), None)
        .await
        .unwrap();
    let relinked = f
        .coordinator
        .link_endpoints(&name("west"), &name("north"))
        .await
        .unwrap();
    assert!(relinked.result.corrections.iter().any(|c| c.endpoint == name("south")));

    let registry = f.coordinator.registry();
    assert_eq!(registry.link_state(&name("west")).unwrap(), LinkState::Linked(name("north")));
    assert_eq!(registry.link_state(&name("north")).unwrap(), LinkState::Linked(name("west")));
    assert_eq!(registry.link_state(&name("south")).unwrap(), LinkState::Unlinked);

    f.coordinator.unlink_endpoint(&name("north")).await.unwrap();
    let registry = f.coordinator.registry();
    assert_eq!(registry.link_state(&name("north")).unwrap(), LinkState::Unlinked);
    assert_eq!(registry.link_state(&name("west")).unwrap(), LinkState::Unlinked);
}

#[tokio::test]
async fn test_exit_requires_confirmation() {
    let mut f = fixture().await;
    f.coordinator.begin_use(f.alice.clone(), &name("north")).await.unwrap();

    assert!(matches!(
        f.coordinator.confirm_exit(f.alice.id).await,
        Err(DaemonError::Precondition { .. })
    ));

    f.coordinator.request_exit(f.alice.id).unwrap();
    let exited = f.coordinator.confirm_exit(f.alice.id).await.unwrap();
    assert_eq!(exited.result.status, TradeStatus::Empty);
    assert!(f.coordinator.session_of(f.alice.id).is_none());
}
