//! Coordinator: the single entry point for every trade and registry change.
//!
//! The coordinator owns the endpoint registry, the session table, pending
//! offline settlements and lost-and-found backlogs. The daemon wraps it in
//! one `RwLock`, which makes that lock the serialization point for all
//! mutations and reconciler sweeps.
//!
//! # Flow
//!
//! ```text
//! API / World event → Coordinator → TradeSession transition
//!                                 → SettlementExecutor (items move)
//!                                 → Store (write-through, warnings only)
//!                                 → EventBus
//! ```
//!
//! A settling transition closes the session in memory first. If the World
//! then fails before any item moved, the pre-transition session is put back
//! so the trade can be retried.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use tradepost_domain::{
    AcceptOutcome, ActorId, ActorRef, ClaimOutcome, Clock, ContainerRef, Endpoint, EndpointName,
    ItemStack, LinkState, Location, LockOutcome, LostAndFound, OfflineSettlement, SessionKey,
    Settlement, Side, Slots, TradeEvent, TradeSession, TradeStatus, TransitionError,
};
use tradepost_engine::{
    downgrade, plan_settlement, verify_offers, EndpointRegistry, LinkReport, UnlinkReport,
};
use tradepost_exec::{
    ExecError, PreviewView, SettlementExecutor, SettlementOutcome, WorldPort,
};
use tradepost_store::{Store, StoreError};

use crate::config::TradeConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::views::{
    ClaimSummary, ConnectReport, ContainerAccess, DisconnectReport, EndpointInfo, NearbyEndpoint,
    OfferView, Reply, RestoreReport, SessionSummary, SweepReport, TradeUpdate,
};

// =============================================================================
// Coordinator
// =============================================================================

/// Orchestrates endpoints, trade sessions and settlements.
pub struct Coordinator<W: WorldPort + 'static, S: Store + 'static> {
    /// Endpoint pair registry
    registry: EndpointRegistry,
    /// Active sessions; a session exists only while a side is populated
    sessions: HashMap<SessionKey, TradeSession>,
    /// actor → session they are trading in
    actors: HashMap<ActorId, SessionKey>,
    /// Lost-and-found backlogs, never overwritten, only appended or claimed
    backlogs: HashMap<ActorId, LostAndFound>,
    /// Settlements waiting for their actor to reconnect
    pending: HashMap<ActorId, Vec<OfflineSettlement>>,
    /// Pending exit confirmations (actor → expiry)
    exit_confirmations: HashMap<ActorId, DateTime<Utc>>,
    /// Applies settlement plans against the World
    executor: SettlementExecutor<W>,
    world: Arc<W>,
    /// Store for persistence
    store: Arc<S>,
    /// Event bus for publishing events
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: TradeConfig,
}

impl<W: WorldPort + 'static, S: Store + 'static> Coordinator<W, S> {
    /// Create a coordinator with an empty registry.
    pub fn new(
        world: Arc<W>,
        store: Arc<S>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: TradeConfig,
    ) -> Self {
        Self {
            registry: EndpointRegistry::new(),
            sessions: HashMap::new(),
            actors: HashMap::new(),
            backlogs: HashMap::new(),
            pending: HashMap::new(),
            exit_confirmations: HashMap::new(),
            executor: SettlementExecutor::new(world.clone(), config.overflow),
            world,
            store,
            event_bus,
            clock,
            config,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn world(&self) -> &Arc<W> {
        &self.world
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn session(&self, key: &SessionKey) -> Option<&TradeSession> {
        self.sessions.get(key)
    }

    /// Session the actor is trading in
    pub fn session_of(&self, actor: ActorId) -> Option<&TradeSession> {
        self.actors.get(&actor).and_then(|key| self.sessions.get(key))
    }

    /// Status of a pair; EMPTY when no session is open
    pub fn status_of(&self, key: &SessionKey) -> TradeStatus {
        self.sessions
            .get(key)
            .map(|s| s.status())
            .unwrap_or(TradeStatus::Empty)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn backlog(&self, actor: ActorId) -> Option<&LostAndFound> {
        self.backlogs.get(&actor)
    }

    pub fn pending_settlements(&self, actor: ActorId) -> &[OfflineSettlement] {
        self.pending.get(&actor).map(Vec::as_slice).unwrap_or(&[])
    }

    // =========================================================================
    // Trade operations
    // =========================================================================

    /// Start or resume trading at `endpoint`.
    ///
    /// The endpoint must be properly linked. Claiming a side the actor
    /// already holds resumes it.
    pub async fn begin_use(
        &mut self,
        actor: ActorRef,
        endpoint: &EndpointName,
    ) -> DaemonResult<Reply<TradeUpdate>> {
        let partner = match self.registry.link_state(endpoint)? {
            LinkState::Linked(partner) => partner,
            _ => return Err(DaemonError::NotLinked(endpoint.clone())),
        };
        let key = SessionKey::new(endpoint.clone(), partner);
        let side = key
            .side_of(endpoint)
            .ok_or_else(|| DaemonError::NotFound(endpoint.to_string()))?;

        if let Some(current) = self.actors.get(&actor.id) {
            if *current != key {
                return Err(DaemonError::Precondition {
                    status: self.status_of(current),
                    message: format!("you are already trading at {}", current),
                });
            }
        }

        info!(actor_id = %actor.id, %endpoint, "Actor beginning trade");

        let mut warnings = Vec::new();
        let now = self.now();
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| TradeSession::new(key.clone(), now));
        let previous = session.status();

        let outcome = match session.claim(side, actor.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                if session.is_vacant() {
                    self.sessions.remove(&key);
                }
                return Err(self.rejected(&key, e, &mut warnings).await);
            },
        };
        session.touch(now);
        let status = session.status();
        let waiting_on = session.waiting_on();
        let counterpart = session.actor(side.other()).map(|s| s.actor.clone());

        self.actors.insert(actor.id, key.clone());
        self.publish_status(&key, previous, status);
        self.publish(TradeEvent::SideClaimed {
            key: key.clone(),
            side,
            actor_id: actor.id,
            status,
            timestamp: self.now(),
        });
        self.save_session(&key, &mut warnings).await;

        let message = match (outcome, counterpart) {
            (ClaimOutcome::Paired, Some(counterpart)) => {
                self.tell(
                    counterpart.id,
                    &format!(
                        "{} joined the trade at {}. Fill your container and lock when ready.",
                        actor.name, endpoint
                    ),
                )
                .await;
                format!(
                    "Trading with {}. Fill your container and lock when ready.",
                    counterpart.name
                )
            },
            (ClaimOutcome::Resumed, _) => {
                format!("Resumed your trade at {}; waiting for {}", endpoint, waiting_on)
            },
            _ => format!("Trade opened at {}; waiting for {}", endpoint, waiting_on),
        };

        Ok(Reply::new(
            TradeUpdate {
                key,
                status,
                message,
            },
            warnings,
        ))
    }

    /// Lock the actor's container contents as their offer.
    ///
    /// The second lock moves the session into DECIDING and pushes a preview
    /// to each side.
    pub async fn declare_locked(&mut self, actor: ActorId) -> DaemonResult<Reply<TradeUpdate>> {
        let (key, side) = self.locate(actor)?;
        let container = self.registry.require(key.endpoint(side))?.container.clone();
        let offer = self.world.container_contents(&container).await?;

        let mut warnings = Vec::new();
        let session = self.session_mut(&key)?;
        let previous = session.status();
        let result = session.lock(side, offer);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.rejected(&key, e, &mut warnings).await),
        };
        let status = session.status();
        let waiting_on = session.waiting_on();
        let counterpart = session.actor(side.other()).map(|s| s.actor.clone());

        info!(actor_id = %actor, %key, %status, "Offer locked");

        self.publish_status(&key, previous, status);
        self.publish(TradeEvent::OfferLocked {
            key: key.clone(),
            side,
            actor_id: actor,
            status,
            timestamp: self.now(),
        });
        self.save_session(&key, &mut warnings).await;

        let message = match outcome {
            LockOutcome::Deciding => {
                self.publish(TradeEvent::DecidingEntered {
                    key: key.clone(),
                    timestamp: self.now(),
                });
                self.push_previews(&key).await;
                "Both offers are locked. Review your partner's offer, then accept or reject."
                    .to_string()
            },
            LockOutcome::Locked => {
                if let Some(counterpart) = counterpart {
                    self.tell(
                        counterpart.id,
                        &format!("{} locked their offer.", self.actor_name(&key, side)),
                    )
                    .await;
                }
                format!("Offer locked; waiting for {}", waiting_on)
            },
        };

        Ok(Reply::new(
            TradeUpdate {
                key,
                status,
                message,
            },
            warnings,
        ))
    }

    /// Accept or reject the counterpart's offer.
    ///
    /// A second accept from the same actor is a precondition error and
    /// changes nothing.
    pub async fn decide(&mut self, actor: ActorId, accept: bool) -> DaemonResult<Reply<TradeUpdate>> {
        let (key, side) = self.locate(actor)?;
        let mut warnings = Vec::new();
        let session = self.session_mut(&key)?;
        let snapshot = session.clone();
        let previous = session.status();

        if !accept {
            let result = session.reject(side);
            return match result {
                Ok(settlement) => {
                    info!(actor_id = %actor, %key, "Offer rejected");
                    let update = self.settle(snapshot, settlement, &mut warnings).await?;
                    Ok(Reply::new(update, warnings))
                },
                Err(e) => Err(self.rejected(&key, e, &mut warnings).await),
            };
        }

        let result = session.accept(side);
        let status = session.status();
        match result {
            Ok(outcome) => {
                self.publish(TradeEvent::OfferAccepted {
                    key: key.clone(),
                    side,
                    actor_id: actor,
                    timestamp: self.now(),
                });
                match outcome {
                    AcceptOutcome::Accepted => {
                        info!(actor_id = %actor, %key, "Offer accepted");
                        self.publish_status(&key, previous, status);
                        self.save_session(&key, &mut warnings).await;
                        if let Some(counterpart) = snapshot.actor(side.other()) {
                            self.tell(
                                counterpart.actor.id,
                                &format!(
                                    "{} accepted your offer.",
                                    self.actor_name(&key, side)
                                ),
                            )
                            .await;
                        }
                        let waiting_on = self
                            .sessions
                            .get(&key)
                            .map(|s| s.waiting_on())
                            .unwrap_or_default();
                        Ok(Reply::new(
                            TradeUpdate {
                                key,
                                status,
                                message: format!("Accepted; waiting for {}", waiting_on),
                            },
                            warnings,
                        ))
                    },
                    AcceptOutcome::Settled(settlement) => {
                        info!(actor_id = %actor, %key, "Both sides accepted, swapping");
                        let update = self.settle(snapshot, settlement, &mut warnings).await?;
                        Ok(Reply::new(update, warnings))
                    },
                }
            },
            Err(e) => Err(self.rejected(&key, e, &mut warnings).await),
        }
    }

    /// Cancel the actor's trade, returning each side's own items.
    pub async fn cancel(&mut self, actor: ActorId) -> DaemonResult<Reply<TradeUpdate>> {
        let (key, side) = self.locate(actor)?;
        let mut warnings = Vec::new();
        let session = self.session_mut(&key)?;
        let snapshot = session.clone();
        let result = session.cancel(side);
        match result {
            Ok(settlement) => {
                info!(actor_id = %actor, %key, "Trade cancelled");
                let update = self.settle(snapshot, settlement, &mut warnings).await?;
                Ok(Reply::new(update, warnings))
            },
            Err(e) => Err(self.rejected(&key, e, &mut warnings).await),
        }
    }

    /// Ask to leave the trade. Must be confirmed within the confirmation TTL.
    pub fn request_exit(&mut self, actor: ActorId) -> DaemonResult<Reply<TradeUpdate>> {
        let (key, _) = self.locate(actor)?;
        let expires = self
            .now()
            .checked_add_signed(self.config.confirm_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.exit_confirmations.insert(actor, expires);
        debug!(actor_id = %actor, %expires, "Exit confirmation pending");

        Ok(Reply::new(
            TradeUpdate {
                status: self.status_of(&key),
                key,
                message: format!(
                    "Confirm within {} seconds to cancel the trade and get your items back.",
                    self.config.confirm_ttl.num_seconds()
                ),
            },
            Vec::new(),
        ))
    }

    /// Confirm a pending exit; cancels the trade while the confirmation lives.
    pub async fn confirm_exit(&mut self, actor: ActorId) -> DaemonResult<Reply<TradeUpdate>> {
        let (key, _) = self.locate(actor)?;
        let now = self.now();
        match self.exit_confirmations.remove(&actor) {
            Some(expires) if now < expires => self.cancel(actor).await,
            _ => Err(DaemonError::Precondition {
                status: self.status_of(&key),
                message: "there is no pending exit to confirm; request the exit again".to_string(),
            }),
        }
    }

    // =========================================================================
    // Actor presence
    // =========================================================================

    /// An actor came online.
    ///
    /// Resumes their trade side, delivers pending settlement notices, moves
    /// them back out of the trade area and claims their backlog.
    pub async fn actor_connected(&mut self, actor: ActorRef) -> DaemonResult<Reply<ConnectReport>> {
        let mut warnings = Vec::new();
        self.publish(TradeEvent::ActorConnected {
            actor_id: actor.id,
            timestamp: self.now(),
        });

        let resumed = self.actors.get(&actor.id).cloned();
        if let Some(key) = &resumed {
            let now = self.now();
            if let Some(session) = self.sessions.get_mut(key) {
                session.reconnect(actor.id);
                session.touch(now);
            }
            self.save_session(key, &mut warnings).await;
            info!(actor_id = %actor.id, %key, "Actor back in trade");
        }

        let mut notices = Vec::new();
        let mut relocated_to = None;
        for settlement in self.pending.remove(&actor.id).unwrap_or_default() {
            let notice = settlement.notice();
            self.tell(actor.id, &notice).await;
            notices.push(notice);

            if relocated_to.is_none() {
                if let Some(location) = &settlement.return_location {
                    match self.world.relocate(actor.id, location).await {
                        Ok(()) => relocated_to = Some(location.clone()),
                        Err(e) => warn!(actor_id = %actor.id, error = %e, "Relocation failed"),
                    }
                }
            }

            if let Err(e) = self.store.settlements().delete(settlement.id).await {
                persist_failed(&mut warnings, "delivered settlement", e);
            }
        }

        let claim = match self.claim_backlog(actor.id, &mut warnings).await {
            Ok(claim) => claim,
            Err(e) => {
                warn!(actor_id = %actor.id, error = %e, "Backlog claim on reconnect failed");
                ClaimSummary {
                    moved: 0,
                    remaining: self
                        .backlogs
                        .get(&actor.id)
                        .map(|b| b.items.clone())
                        .unwrap_or_default(),
                }
            },
        };

        Ok(Reply::new(
            ConnectReport {
                actor_id: actor.id,
                resumed,
                notices,
                relocated_to,
                claim,
            },
            warnings,
        ))
    }

    /// An actor went offline. Their trade is reconciled immediately.
    pub async fn actor_disconnected(
        &mut self,
        actor: ActorId,
    ) -> DaemonResult<Reply<DisconnectReport>> {
        let now = self.now();
        let mut warnings = Vec::new();
        self.exit_confirmations.remove(&actor);
        self.publish(TradeEvent::ActorDisconnected {
            actor_id: actor,
            timestamp: now,
        });

        let Some(key) = self.actors.get(&actor).cloned() else {
            return Ok(Reply::new(
                DisconnectReport {
                    actor_id: actor,
                    key: None,
                    settled: None,
                },
                warnings,
            ));
        };

        if let Some(session) = self.sessions.get_mut(&key) {
            session.disconnect(actor, now);
            session.touch(now);
        }
        self.save_session(&key, &mut warnings).await;
        info!(actor_id = %actor, %key, "Actor left mid-trade");

        let settled = self.reconcile(&key, now, &mut warnings).await?;

        Ok(Reply::new(
            DisconnectReport {
                actor_id: actor,
                key: Some(key),
                settled,
            },
            warnings,
        ))
    }

    /// Move the actor's lost-and-found backlog into their inventory.
    pub async fn claim_lost_and_found(&mut self, actor: ActorId) -> DaemonResult<Reply<ClaimSummary>> {
        if !self.world.is_actor_online(actor).await {
            return Err(ExecError::ActorOffline(actor).into());
        }
        let mut warnings = Vec::new();
        let claim = self.claim_backlog(actor, &mut warnings).await?;
        Ok(Reply::new(claim, warnings))
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// One reconciler pass.
    ///
    /// Force-settles every session with a side offline past the grace
    /// period and discards expired exit confirmations. A failing session is
    /// logged and left for the next pass; it never stops the others.
    pub async fn sweep(&mut self) -> SweepReport {
        let now = self.now();

        let before = self.exit_confirmations.len();
        self.exit_confirmations.retain(|_, expires| *expires > now);

        let mut keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        keys.sort();

        let mut report = SweepReport {
            examined: keys.len(),
            expired_confirmations: before - self.exit_confirmations.len(),
            ..SweepReport::default()
        };

        for key in keys {
            match self.reconcile(&key, now, &mut report.warnings).await {
                Ok(Some(update)) => report.settled.push(update.key),
                Ok(None) => {},
                Err(e) => {
                    report.failures += 1;
                    error!(%key, error = %e, "Reconciliation failed, will retry");
                },
            }
        }

        if !report.settled.is_empty() || report.failures > 0 {
            info!(
                examined = report.examined,
                settled = report.settled.len(),
                failures = report.failures,
                "Sweep complete"
            );
            self.event_bus.send(DaemonEvent::SweepCompleted {
                settled: report.settled.len(),
                failures: report.failures,
                timestamp: now,
            });
        }

        report
    }

    /// Settle one session if it timed out or contradicts its own status.
    async fn reconcile(
        &mut self,
        key: &SessionKey,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> DaemonResult<Option<TradeUpdate>> {
        let grace = self.config.grace_period;
        let Some(session) = self.sessions.get_mut(key) else {
            return Ok(None);
        };
        if session.is_vacant() {
            self.sessions.remove(key);
            return Ok(None);
        }

        let snapshot = session.clone();
        if let Err(violation) = session.check_invariants() {
            error!(%key, error = %violation, "Trade invariant violated, force-settling");
            return match session.abort() {
                Some(settlement) => self.settle(snapshot, settlement, warnings).await.map(Some),
                None => Ok(None),
            };
        }

        match session.expire(now, grace) {
            Some(settlement) => {
                info!(%key, "Offline grace period expired, force-settling");
                self.settle(snapshot, settlement, warnings).await.map(Some)
            },
            None => Ok(None),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The caller's own offer: locked snapshot, or live contents before lock.
    pub async fn current_offer(&self, actor: ActorId) -> DaemonResult<OfferView> {
        let (key, side) = self.locate(actor)?;
        let session = self.session_ref(&key)?;
        let endpoint = key.endpoint(side).clone();

        let (offer, locked) = match &session.side(side).locked_offer {
            Some(offer) => (offer.clone(), true),
            None => {
                let container = &self.registry.require(&endpoint)?.container;
                (self.world.container_contents(container).await?, false)
            },
        };

        Ok(OfferView {
            status: session.status(),
            key,
            side,
            endpoint,
            offer,
            locked,
        })
    }

    /// Re-render the decision view and push it to the actor.
    pub async fn preview(&self, actor: ActorId) -> DaemonResult<PreviewView> {
        let (key, side) = self.locate(actor)?;
        let session = self.session_ref(&key)?;
        let view = build_preview(session, side).ok_or_else(|| DaemonError::Precondition {
            status: session.status(),
            message: format!(
                "there is no offer to review yet; waiting for {}",
                session.waiting_on()
            ),
        })?;

        if let Err(e) = self.world.show_preview(actor, &view).await {
            debug!(actor_id = %actor, error = %e, "Preview not shown");
        }
        Ok(view)
    }

    /// Permission check for opening or clicking an endpoint's container.
    pub fn container_access(
        &self,
        actor: ActorId,
        endpoint: &EndpointName,
    ) -> DaemonResult<ContainerAccess> {
        self.registry.require(endpoint)?;

        let Some((key, session)) = self.session_at(endpoint) else {
            return Ok(ContainerAccess::Denied(format!(
                "start a trade at {} before using its container",
                endpoint
            )));
        };
        let Some(side) = key.side_of(endpoint) else {
            return Ok(ContainerAccess::Denied(format!("{} is not part of {}", endpoint, key)));
        };

        Ok(match session.actor(side) {
            Some(holder) if holder.actor.id == actor => {
                if session.can_modify(side) {
                    ContainerAccess::Editable
                } else {
                    ContainerAccess::ReadOnly
                }
            },
            Some(holder) => {
                ContainerAccess::Denied(format!("{} is in use by {}", endpoint, holder.actor.name))
            },
            None => ContainerAccess::Denied(format!(
                "start a trade at {} before using its container",
                endpoint
            )),
        })
    }

    /// Every active session, ordered by key.
    pub fn status(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.values().map(SessionSummary::of).collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    // =========================================================================
    // Endpoint administration
    // =========================================================================

    pub async fn create_endpoint(
        &mut self,
        name: EndpointName,
        container: ContainerRef,
        location: Option<Location>,
    ) -> DaemonResult<Reply<EndpointInfo>> {
        let now = self.now();
        let endpoint = self.registry.create(name, container, location, now)?.clone();

        let mut warnings = Vec::new();
        if let Err(e) = self.store.endpoints().save(&endpoint).await {
            persist_failed(&mut warnings, "endpoint", e);
        }
        self.publish(TradeEvent::EndpointCreated {
            name: endpoint.name.clone(),
            timestamp: self.now(),
        });

        Ok(Reply::new(EndpointInfo::new(&endpoint, LinkState::Unlinked, None), warnings))
    }

    /// Link two endpoints, clearing any stale links around them first.
    pub async fn link_endpoints(
        &mut self,
        a: &EndpointName,
        b: &EndpointName,
    ) -> DaemonResult<Reply<LinkReport>> {
        for name in [a, b] {
            self.ensure_idle(name)?;
            if let Some(partner) = self.registry.partner(name) {
                self.ensure_idle(&partner)?;
            }
        }

        let report = self.registry.link(a, b)?;

        let mut warnings = Vec::new();
        self.save_endpoints(&report.changed(), &mut warnings).await;
        if !report.already_linked || !report.corrections.is_empty() {
            self.publish(TradeEvent::EndpointsLinked {
                a: report.a.clone(),
                b: report.b.clone(),
                corrected: report.corrections.iter().map(|c| c.endpoint.clone()).collect(),
                timestamp: self.now(),
            });
        }

        Ok(Reply::new(report, warnings))
    }

    /// Clear an endpoint's link and every link pointing at it.
    pub async fn unlink_endpoint(&mut self, name: &EndpointName) -> DaemonResult<Reply<UnlinkReport>> {
        self.ensure_idle(name)?;
        let report = self.registry.unlink(name)?;

        let mut warnings = Vec::new();
        self.save_endpoints(&report.changed(), &mut warnings).await;
        if !report.cleared.is_empty() {
            self.publish(TradeEvent::EndpointUnlinked {
                name: report.endpoint.clone(),
                cleared: report.cleared.clone(),
                timestamp: self.now(),
            });
        }

        Ok(Reply::new(report, warnings))
    }

    /// Delete an endpoint. Refused while it or its partner is trading.
    pub async fn delete_endpoint(&mut self, name: &EndpointName) -> DaemonResult<Reply<UnlinkReport>> {
        self.ensure_idle(name)?;
        if let Some(partner) = self.registry.partner(name) {
            self.ensure_idle(&partner)?;
        }

        let (endpoint, report) = self.registry.delete(name)?;

        let mut warnings = Vec::new();
        if let Err(e) = self.store.endpoints().delete(&endpoint.name).await {
            persist_failed(&mut warnings, "endpoint deletion", e);
        }
        let others: Vec<EndpointName> = report
            .changed()
            .into_iter()
            .filter(|n| *n != endpoint.name)
            .collect();
        self.save_endpoints(&others, &mut warnings).await;

        self.publish(TradeEvent::EndpointDeleted {
            name: endpoint.name.clone(),
            timestamp: self.now(),
        });

        Ok(Reply::new(report, warnings))
    }

    pub fn list_endpoints(&self) -> Vec<EndpointInfo> {
        self.registry
            .list()
            .map(|endpoint| self.describe(endpoint))
            .collect()
    }

    /// Endpoints within `radius` of `origin`, nearest first.
    pub fn find_endpoints(&self, origin: &Location, radius: f64) -> DaemonResult<Vec<NearbyEndpoint>> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(DaemonError::Validation(format!("invalid radius: {}", radius)));
        }
        Ok(self
            .registry
            .find_within(origin, radius)
            .into_iter()
            .map(|(distance, endpoint)| NearbyEndpoint {
                distance,
                endpoint: self.describe(endpoint),
            })
            .collect())
    }

    pub fn endpoint_info(&self, name: &EndpointName) -> DaemonResult<EndpointInfo> {
        let endpoint = self.registry.require(name)?;
        Ok(self.describe(endpoint))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load everything from the store and rebase offline timestamps so that
    /// server downtime does not count against the grace period.
    pub async fn restore(&mut self) -> DaemonResult<RestoreReport> {
        let startup = self.now();
        let endpoints = self.store.endpoints().load_all().await?;
        let sessions = self.store.sessions().load_all().await?;
        let settlements = self.store.settlements().load_all().await?;
        let backlogs = self.store.lost_and_found().load_all().await?;
        let stopped_at = self.store.lifecycle().load_stop().await?;

        let mut report = RestoreReport {
            endpoints: endpoints.records.len(),
            settlements: settlements.records.len(),
            skipped: endpoints.skipped + sessions.skipped + settlements.skipped + backlogs.skipped,
            downtime_secs: stopped_at.map(|stop| (startup - stop).num_seconds().max(0)),
            ..RestoreReport::default()
        };

        self.registry = EndpointRegistry::from_endpoints(endpoints.records);
        self.sessions.clear();
        self.actors.clear();
        self.backlogs.clear();
        self.pending.clear();
        self.exit_confirmations.clear();

        let (assume_logout, shift) = match stopped_at {
            Some(stop) => (stop, (startup - stop).max(Duration::zero())),
            None => (startup, Duration::zero()),
        };

        for mut session in sessions.records {
            if session.is_vacant() || session.status().is_terminal() {
                warn!(key = %session.key, status = %session.status(), "Closed session record skipped");
                report.skipped += 1;
                continue;
            }
            let missing: Vec<&EndpointName> = Side::ALL
                .iter()
                .map(|side| session.key.endpoint(*side))
                .filter(|name| self.registry.get(name).is_none())
                .collect();
            if !missing.is_empty() {
                error!(key = %session.key, ?missing, "Session references unknown endpoints, skipped");
                report.skipped += 1;
                continue;
            }

            session.rebase_offline(assume_logout, shift);
            for side in session.populated_sides() {
                if let Some(actor) = session.actor(side) {
                    self.actors.insert(actor.actor.id, session.key.clone());
                }
            }
            self.sessions.insert(session.key.clone(), session);
            report.sessions += 1;
        }

        for settlement in settlements.records {
            self.pending
                .entry(settlement.actor.id)
                .or_default()
                .push(settlement);
        }
        for pending in self.pending.values_mut() {
            pending.sort_by_key(|s| s.created_at);
        }

        for backlog in backlogs.records {
            if !backlog.is_empty() {
                self.backlogs.insert(backlog.actor, backlog);
                report.backlogs += 1;
            }
        }

        let mut keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        keys.sort();
        for key in keys {
            self.save_session(&key, &mut report.warnings).await;
        }

        info!(
            endpoints = report.endpoints,
            sessions = report.sessions,
            settlements = report.settlements,
            backlogs = report.backlogs,
            skipped = report.skipped,
            downtime_secs = ?report.downtime_secs,
            "State restored"
        );

        Ok(report)
    }

    /// Record the stop timestamp read back by the next `restore`.
    pub async fn record_stop(&self) -> DaemonResult<()> {
        let at = self.now();
        self.store.lifecycle().save_stop(at).await?;
        info!(%at, "Stop timestamp recorded");
        Ok(())
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Move items for a closed session and drop it from the table.
    ///
    /// `snapshot` is the session before the closing transition; it is put
    /// back if the World fails before anything moved.
    async fn settle(
        &mut self,
        snapshot: TradeSession,
        settlement: Settlement,
        warnings: &mut Vec<String>,
    ) -> DaemonResult<TradeUpdate> {
        let key = settlement.key.clone();
        let previous = snapshot.status();

        let prepared = self.read_pair(&key).await;
        let (endpoints, contents) = match prepared {
            Ok(pair) => pair,
            Err(e) => {
                error!(%key, error = %e, "Cannot read containers, trade left open");
                self.sessions.insert(key, snapshot);
                return Err(e);
            },
        };

        let mut settlement = settlement;
        if settlement.swap {
            let mismatched = verify_offers(&settlement, &contents);
            if !mismatched.is_empty() {
                error!(
                    %key,
                    sides = ?mismatched,
                    "Container contents no longer match locked offers, returning items"
                );
                settlement = downgrade(&settlement);
            }
        }

        let plan = plan_settlement(
            &settlement,
            [&endpoints[0], &endpoints[1]],
            &contents,
            self.now(),
        );
        let outcome = match self.executor.apply(&plan).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%key, error = %e, "Settlement could not be applied, trade left open");
                self.sessions.insert(key, snapshot);
                return Err(e.into());
            },
        };

        self.record_outcome(&outcome, warnings).await;

        for party in &settlement.parties {
            self.actors.remove(&party.session.actor.id);
            self.exit_confirmations.remove(&party.session.actor.id);
        }
        self.sessions.remove(&key);
        if let Err(e) = self.store.sessions().delete(&key).await {
            persist_failed(warnings, "closed session", e);
        }

        let final_status = settlement.final_status;
        self.publish_status(&key, previous, final_status);
        self.publish(TradeEvent::Settled {
            key: key.clone(),
            reasons: settlement
                .parties
                .iter()
                .map(|p| (p.session.actor.id, p.reason))
                .collect(),
            final_status,
            timestamp: self.now(),
        });

        let message = settlement
            .parties
            .first()
            .map(|p| p.reason.explain().to_string())
            .unwrap_or_else(|| "The trade was closed.".to_string());

        Ok(TradeUpdate {
            key,
            status: final_status,
            message,
        })
    }

    /// Book lost-and-found additions and offline notices.
    async fn record_outcome(&mut self, outcome: &SettlementOutcome, warnings: &mut Vec<String>) {
        let owed: Vec<(ActorId, Vec<ItemStack>)> = outcome
            .lost_and_found()
            .map(|(actor, items)| (actor, items.to_vec()))
            .collect();
        for (actor, items) in owed {
            self.append_backlog(actor, items, warnings).await;
        }

        for settlement in outcome.offline_settlements() {
            debug!(actor_id = %settlement.actor.id, reason = %settlement.reason, "Settlement deferred");
            if let Err(e) = self.store.settlements().save(settlement).await {
                persist_failed(warnings, "offline settlement", e);
            }
            self.pending
                .entry(settlement.actor.id)
                .or_default()
                .push(settlement.clone());
        }
    }

    async fn read_pair(&self, key: &SessionKey) -> DaemonResult<([Endpoint; 2], [Slots; 2])> {
        let one = self.registry.require(key.endpoint(Side::One))?.clone();
        let two = self.registry.require(key.endpoint(Side::Two))?.clone();
        let contents = [
            self.world.container_contents(&one.container).await?,
            self.world.container_contents(&two.container).await?,
        ];
        Ok(([one, two], contents))
    }

    async fn append_backlog(&mut self, actor: ActorId, items: Vec<ItemStack>, warnings: &mut Vec<String>) {
        let now = self.now();
        let backlog = self
            .backlogs
            .entry(actor)
            .or_insert_with(|| LostAndFound::new(actor, now));
        backlog.append(items, now);
        let record = backlog.clone();
        info!(actor_id = %actor, stacks = record.items.len(), "Lost-and-found updated");

        if let Err(e) = self.store.lost_and_found().save(&record).await {
            persist_failed(warnings, "lost-and-found", e);
        }
    }

    async fn claim_backlog(
        &mut self,
        actor: ActorId,
        warnings: &mut Vec<String>,
    ) -> DaemonResult<ClaimSummary> {
        let items = match self.backlogs.get(&actor) {
            Some(backlog) if !backlog.is_empty() => backlog.items.clone(),
            _ => return Ok(ClaimSummary::default()),
        };

        let claim = self.executor.claim_backlog(actor, &items).await?;

        if claim.remaining.is_empty() {
            self.backlogs.remove(&actor);
            if let Err(e) = self.store.lost_and_found().delete(actor).await {
                persist_failed(warnings, "claimed lost-and-found", e);
            }
        } else if let Some(backlog) = self.backlogs.get_mut(&actor) {
            backlog.items = claim.remaining.clone();
            backlog.updated_at = self.clock.now();
            let record = backlog.clone();
            if let Err(e) = self.store.lost_and_found().save(&record).await {
                persist_failed(warnings, "lost-and-found", e);
            }
        }

        Ok(ClaimSummary {
            moved: claim.moved,
            remaining: claim.remaining,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn locate(&self, actor: ActorId) -> DaemonResult<(SessionKey, Side)> {
        let key = self
            .actors
            .get(&actor)
            .ok_or(DaemonError::NotTrading(actor))?;
        let side = self
            .sessions
            .get(key)
            .and_then(|s| s.side_of(actor))
            .ok_or(DaemonError::NotTrading(actor))?;
        Ok((key.clone(), side))
    }

    fn session_ref(&self, key: &SessionKey) -> DaemonResult<&TradeSession> {
        self.sessions
            .get(key)
            .ok_or_else(|| DaemonError::NotFound(format!("trade {}", key)))
    }

    /// Mutable session access; stamps the session as updated now.
    fn session_mut(&mut self, key: &SessionKey) -> DaemonResult<&mut TradeSession> {
        let now = self.now();
        let session = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| DaemonError::NotFound(format!("trade {}", key)))?;
        session.touch(now);
        Ok(session)
    }

    /// Session using `endpoint`, if any
    fn session_at(&self, endpoint: &EndpointName) -> Option<(&SessionKey, &TradeSession)> {
        self.sessions.iter().find(|(key, _)| key.contains(endpoint))
    }

    fn ensure_idle(&self, endpoint: &EndpointName) -> DaemonResult<()> {
        match self.session_at(endpoint) {
            Some((key, _)) => Err(DaemonError::EndpointInUse {
                endpoint: endpoint.clone(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    fn describe(&self, endpoint: &Endpoint) -> EndpointInfo {
        let link = self
            .registry
            .link_state(&endpoint.name)
            .unwrap_or(LinkState::Unlinked);
        let trade = self.session_at(&endpoint.name).map(|(_, s)| s.status());
        EndpointInfo::new(endpoint, link, trade)
    }

    fn actor_name(&self, key: &SessionKey, side: Side) -> String {
        self.sessions
            .get(key)
            .and_then(|s| s.actor(side))
            .map(|s| s.actor.name.clone())
            .unwrap_or_else(|| "Your partner".to_string())
    }

    /// Turn a refused transition into an error, force-settling the session
    /// if the refusal exposed an inconsistency.
    async fn rejected(
        &mut self,
        key: &SessionKey,
        err: TransitionError,
        warnings: &mut Vec<String>,
    ) -> DaemonError {
        if let TransitionError::InvariantViolation { message, .. } = &err {
            error!(%key, %message, "Trade invariant violated, force-settling");
            if let Some(session) = self.sessions.get_mut(key) {
                let snapshot = session.clone();
                if let Some(settlement) = session.abort() {
                    if let Err(e) = self.settle(snapshot, settlement, warnings).await {
                        error!(%key, error = %e, "Force-settlement failed");
                    }
                }
            }
        }
        err.into()
    }

    async fn push_previews(&self, key: &SessionKey) {
        let Some(session) = self.sessions.get(key) else {
            return;
        };
        for side in Side::ALL {
            if let Some(view) = build_preview(session, side) {
                if let Err(e) = self.world.show_preview(view.viewer, &view).await {
                    debug!(actor_id = %view.viewer, error = %e, "Preview not shown");
                }
            }
        }
    }

    async fn tell(&self, actor: ActorId, message: &str) {
        if let Err(e) = self.world.notify(actor, message).await {
            debug!(actor_id = %actor, error = %e, "Notification failed");
        }
    }

    /// Write-through after the in-memory transition has completed. Awaited
    /// so a failed write reaches the caller as a warning.
    async fn save_session(&self, key: &SessionKey, warnings: &mut Vec<String>) {
        if let Some(session) = self.sessions.get(key) {
            if let Err(e) = self.store.sessions().save(session).await {
                persist_failed(warnings, "session", e);
            }
        }
    }

    async fn save_endpoints(&self, names: &[EndpointName], warnings: &mut Vec<String>) {
        let endpoints: Vec<Endpoint> = names
            .iter()
            .filter_map(|name| self.registry.get(name).cloned())
            .collect();
        if let Err(e) = self.store.endpoints().save_all(&endpoints).await {
            persist_failed(warnings, "endpoints", e);
        }
    }

    fn publish(&self, event: TradeEvent) {
        debug!(event_type = event.event_type(), "Publishing event");
        self.event_bus.send(DaemonEvent::Trade(event));
    }

    fn publish_status(&self, key: &SessionKey, previous: TradeStatus, new: TradeStatus) {
        if previous != new {
            self.event_bus.send(DaemonEvent::StatusChanged {
                key: key.clone(),
                previous,
                new,
                timestamp: self.now(),
            });
        }
    }
}

/// Decision view for `side`: the counterpart's locked offer.
fn build_preview(session: &TradeSession, side: Side) -> Option<PreviewView> {
    let viewer = session.actor(side)?;
    let counterpart = session.actor(side.other())?;
    let offer = session.counterpart_offer(side)?.clone();
    Some(PreviewView {
        key: session.key.clone(),
        viewer: viewer.actor.id,
        counterpart: counterpart.actor.name.clone(),
        counterpart_endpoint: session.key.endpoint(side.other()).clone(),
        offer,
        accepted: session.side(side).accepted,
        counterpart_accepted: session.side(side.other()).accepted,
        status: session.status(),
    })
}

fn persist_failed(warnings: &mut Vec<String>, what: &str, err: StoreError) {
    warn!(error = %err, record = what, "Persistence write failed");
    warnings.push(format!("could not save {}: {}", what, err));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tradepost_domain::{ItemKind, ManualClock};
    use tradepost_exec::StubWorld;
    use tradepost_store::MemoryStore;

    struct Harness {
        coordinator: Coordinator<StubWorld, MemoryStore>,
        world: Arc<StubWorld>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        alice: ActorRef,
        bob: ActorRef,
    }

    fn name(s: &str) -> EndpointName {
        EndpointName::new(s).unwrap()
    }

    fn stack(id: &str, amount: u32) -> Option<ItemStack> {
        Some(ItemStack::new(ItemKind::new(id, 64), amount).unwrap())
    }

    fn chest(endpoint: &str) -> ContainerRef {
        ContainerRef(format!("chest:{}", endpoint))
    }

    async fn harness() -> Harness {
        let world = Arc::new(StubWorld::new());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut coordinator = Coordinator::new(
            world.clone(),
            store.clone(),
            Arc::new(EventBus::new(100)),
            clock.clone(),
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

        Harness {
            coordinator,
            world,
            store,
            clock,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_begin_use_requires_link() {
        let mut h = harness().await;
        h.coordinator
            .create_endpoint(name("west"), chest("west"), None)
            .await
            .unwrap();

        let err = h
            .coordinator
            .begin_use(h.alice.clone(), &name("west"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotLinked(_)));

        let err = h
            .coordinator
            .begin_use(h.alice.clone(), &name("east"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Registry(_)));
    }

    #[tokio::test]
    async fn test_not_trading_errors() {
        let mut h = harness().await;
        let stranger = ActorId::generate();

        assert!(matches!(
            h.coordinator.declare_locked(stranger).await,
            Err(DaemonError::NotTrading(_))
        ));
        assert!(matches!(
            h.coordinator.decide(stranger, true).await,
            Err(DaemonError::NotTrading(_))
        ));
        assert!(matches!(
            h.coordinator.cancel(stranger).await,
            Err(DaemonError::NotTrading(_))
        ));
        assert!(matches!(
            h.coordinator.current_offer(stranger).await,
            Err(DaemonError::NotTrading(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_cannot_trade_twice() {
        let mut h = harness().await;
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();

        let err = h
            .coordinator
            .begin_use(h.alice.clone(), &name("south"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Precondition { .. }));

        let resumed = h
            .coordinator
            .begin_use(h.alice.clone(), &name("north"))
            .await
            .unwrap();
        assert_eq!(resumed.result.status, TradeStatus::WaitingForSecond);
        assert!(resumed.result.message.starts_with("Resumed"));
    }

    #[tokio::test]
    async fn test_container_access_follows_lock() {
        let mut h = harness().await;
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();
        h.coordinator.begin_use(h.bob.clone(), &name("south")).await.unwrap();

        assert_eq!(
            h.coordinator.container_access(h.alice.id, &name("north")).unwrap(),
            ContainerAccess::Editable
        );
        assert!(matches!(
            h.coordinator.container_access(h.alice.id, &name("south")).unwrap(),
            ContainerAccess::Denied(_)
        ));

        h.coordinator.declare_locked(h.alice.id).await.unwrap();
        assert_eq!(
            h.coordinator.container_access(h.alice.id, &name("north")).unwrap(),
            ContainerAccess::ReadOnly
        );
    }

    #[tokio::test]
    async fn test_preview_pushed_on_deciding() {
        let mut h = harness().await;
        h.world.put_container(&chest("north"), vec![stack("diamond", 1), None]);
        h.world.put_container(&chest("south"), vec![stack("emerald", 1), None]);

        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();
        h.coordinator.begin_use(h.bob.clone(), &name("south")).await.unwrap();

        let err = h.coordinator.preview(h.alice.id).await.unwrap_err();
        assert!(matches!(err, DaemonError::Precondition { .. }));

        h.coordinator.declare_locked(h.alice.id).await.unwrap();
        let reply = h.coordinator.declare_locked(h.bob.id).await.unwrap();
        assert_eq!(reply.result.status, TradeStatus::Deciding);

        let alice_views = h.world.previews_for(h.alice.id);
        assert_eq!(alice_views.len(), 1);
        assert_eq!(alice_views[0].counterpart, "bob");
        assert_eq!(alice_views[0].offer, vec![stack("emerald", 1), None]);

        let view = h.coordinator.preview(h.bob.id).await.unwrap();
        assert_eq!(view.offer, vec![stack("diamond", 1), None]);
    }

    #[tokio::test]
    async fn test_exit_confirmation_expires() {
        let mut h = harness().await;
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();

        h.coordinator.request_exit(h.alice.id).unwrap();
        h.clock.advance(Duration::seconds(31));
        let report = h.coordinator.sweep().await;
        assert_eq!(report.expired_confirmations, 1);
        assert!(report.settled.is_empty());

        let err = h.coordinator.confirm_exit(h.alice.id).await.unwrap_err();
        assert!(matches!(err, DaemonError::Precondition { .. }));
        assert_eq!(
            h.coordinator.status_of(&SessionKey::new(name("north"), name("south"))),
            TradeStatus::WaitingForSecond
        );

        h.coordinator.request_exit(h.alice.id).unwrap();
        h.clock.advance(Duration::seconds(5));
        let reply = h.coordinator.confirm_exit(h.alice.id).await.unwrap();
        assert_eq!(reply.result.status, TradeStatus::Empty);
        assert!(h.coordinator.session_of(h.alice.id).is_none());
    }

    #[tokio::test]
    async fn test_endpoint_admin_refused_while_trading() {
        let mut h = harness().await;
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();

        assert!(matches!(
            h.coordinator.delete_endpoint(&name("south")).await,
            Err(DaemonError::EndpointInUse { .. })
        ));
        assert!(matches!(
            h.coordinator.unlink_endpoint(&name("north")).await,
            Err(DaemonError::EndpointInUse { .. })
        ));

        h.coordinator.cancel(h.alice.id).await.unwrap();
        let report = h.coordinator.delete_endpoint(&name("south")).await.unwrap();
        assert_eq!(report.result.previous, Some(name("north")));
        assert_eq!(
            h.coordinator.endpoint_info(&name("north")).unwrap().link,
            LinkState::Unlinked
        );
        assert_eq!(h.store.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_becomes_warning() {
        let mut h = harness().await;
        h.store.set_fail_writes(true);

        let reply = h
            .coordinator
            .begin_use(h.alice.clone(), &name("north"))
            .await
            .unwrap();
        assert!(reply.has_warnings());
        assert_eq!(reply.result.status, TradeStatus::WaitingForSecond);
        assert!(h.coordinator.session_of(h.alice.id).is_some());
    }

    #[tokio::test]
    async fn test_failed_clear_leaves_trade_open() {
        let mut h = harness().await;
        h.world.put_container(&chest("north"), vec![stack("diamond", 1)]);
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();

        h.world.set_fail_container(Some(chest("north")));
        assert!(matches!(
            h.coordinator.cancel(h.alice.id).await,
            Err(DaemonError::Exec(_))
        ));
        assert_eq!(
            h.coordinator.session_of(h.alice.id).map(|s| s.status()),
            Some(TradeStatus::WaitingForSecond)
        );
        assert_eq!(h.world.container(&chest("north")), vec![stack("diamond", 1)]);

        h.world.set_fail_container(None);
        h.coordinator.cancel(h.alice.id).await.unwrap();
        assert_eq!(h.world.container(&chest("north")), vec![None]);
    }

    #[tokio::test]
    async fn test_timestamps_follow_coordinator_clock() {
        let mut h = harness().await;
        h.clock.advance(Duration::days(3));
        let key = SessionKey::new(name("north"), name("south"));

        h.coordinator
            .create_endpoint(name("west"), chest("west"), None)
            .await
            .unwrap();
        let west = h.coordinator.registry().get(&name("west")).unwrap();
        assert_eq!(west.created_at, h.clock.now());

        h.world.put_container(&chest("south"), vec![stack("emerald", 1), None]);
        h.coordinator.begin_use(h.alice.clone(), &name("north")).await.unwrap();
        let opened = h.clock.now();
        h.clock.advance(Duration::seconds(10));
        h.coordinator.begin_use(h.bob.clone(), &name("south")).await.unwrap();
        let session = h.coordinator.session(&key).unwrap();
        assert_eq!(session.opened_at, opened);
        assert_eq!(session.updated_at, h.clock.now());

        h.world.set_online(h.bob.id, false);
        h.coordinator.actor_disconnected(h.bob.id).await.unwrap();
        h.clock.advance(Duration::seconds(301));
        let report = h.coordinator.sweep().await;
        assert_eq!(report.settled, vec![key]);

        let settled_at = h.clock.now();
        let pending = h.coordinator.pending_settlements(h.bob.id);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].created_at, settled_at);
        assert_eq!(h.coordinator.backlog(h.bob.id).unwrap().updated_at, settled_at);
    }

    #[tokio::test]
    async fn test_unbounded_durations_do_not_panic() {
        let world = Arc::new(StubWorld::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let forever = Duration::seconds(i64::MAX / 1000);
        let mut coordinator = Coordinator::new(
            world.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new(100)),
            clock.clone(),
            TradeConfig {
                grace_period: forever,
                confirm_ttl: forever,
                ..TradeConfig::default()
            },
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
        coordinator.begin_use(alice.clone(), &name("north")).await.unwrap();

        coordinator.actor_disconnected(alice.id).await.unwrap();
        coordinator.request_exit(alice.id).unwrap();
        clock.advance(Duration::days(3650));
        let report = coordinator.sweep().await;

        assert!(report.settled.is_empty());
        assert_eq!(report.expired_confirmations, 0);
        assert!(coordinator.session_of(alice.id).is_some());
    }
}
