//! Trade Session state machine
//!
//! One session per linked endpoint pair. A session holds at most two actor
//! sessions, their locked offers and accept flags, and the shared status.
//!
//! ```text
//! EMPTY → WAITING_FOR_SECOND → PREPARING → LOCKED_SIDE_n → DECIDING
//!       → ACCEPTED_SIDE_n → SETTLED
//! ```
//!
//! Any state before SETTLED may close early through cancel, reject (while
//! deciding) or an offline timeout; those close by returning each side's own
//! items. The state machine never touches items itself: it reports what has
//! to move and the caller moves it.

use crate::entities::{ActorSession, SettlementReason};
use crate::value_objects::{ActorId, ActorRef, EndpointName, Side, Slots};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Status
// =============================================================================

/// Shared trade status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "side", rename_all = "snake_case")]
pub enum TradeStatus {
    Empty,
    WaitingForSecond,
    Preparing,
    Locked(Side),
    Deciding,
    Accepted(Side),
    Settled,
}

impl TradeStatus {
    /// Position in the lifecycle. Non-decreasing for a session's lifetime.
    pub fn rank(&self) -> u8 {
        match self {
            TradeStatus::Empty => 0,
            TradeStatus::WaitingForSecond => 1,
            TradeStatus::Preparing => 2,
            TradeStatus::Locked(_) => 3,
            TradeStatus::Deciding => 4,
            TradeStatus::Accepted(_) => 5,
            TradeStatus::Settled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Settled)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Empty => write!(f, "EMPTY"),
            TradeStatus::WaitingForSecond => write!(f, "WAITING_FOR_SECOND"),
            TradeStatus::Preparing => write!(f, "PREPARING"),
            TradeStatus::Locked(Side::One) => write!(f, "LOCKED_SIDE_1"),
            TradeStatus::Locked(Side::Two) => write!(f, "LOCKED_SIDE_2"),
            TradeStatus::Deciding => write!(f, "DECIDING"),
            TradeStatus::Accepted(Side::One) => write!(f, "ACCEPTED_SIDE_1"),
            TradeStatus::Accepted(Side::Two) => write!(f, "ACCEPTED_SIDE_2"),
            TradeStatus::Settled => write!(f, "SETTLED"),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Rejected transition. The session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Wrong state for the requested transition
    #[error("{message} (trade status: {status})")]
    Precondition { status: TradeStatus, message: String },

    /// The session's fields contradict its status
    #[error("trade {key} is inconsistent: {message}")]
    InvariantViolation { key: String, message: String },
}

impl TransitionError {
    fn precondition(status: TradeStatus, message: impl Into<String>) -> Self {
        TransitionError::Precondition {
            status,
            message: message.into(),
        }
    }
}

// =============================================================================
// Session key
// =============================================================================

/// The two linked endpoints of a session, in canonical (sorted) order.
///
/// Side 1 is the lower endpoint key, side 2 the higher, so the same pair
/// always produces the same key whichever end it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    endpoints: [EndpointName; 2],
}

impl SessionKey {
    pub fn new(a: EndpointName, b: EndpointName) -> Self {
        if a <= b {
            Self { endpoints: [a, b] }
        } else {
            Self { endpoints: [b, a] }
        }
    }

    pub fn endpoint(&self, side: Side) -> &EndpointName {
        &self.endpoints[side.index()]
    }

    pub fn side_of(&self, name: &EndpointName) -> Option<Side> {
        Side::ALL.into_iter().find(|side| self.endpoint(*side) == name)
    }

    pub fn contains(&self, name: &EndpointName) -> bool {
        self.side_of(name).is_some()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.endpoints[0], self.endpoints[1])
    }
}

// =============================================================================
// Side state
// =============================================================================

/// Per-side state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideState {
    pub actor: Option<ActorSession>,
    /// Container snapshot taken at lock time
    pub locked_offer: Option<Slots>,
    pub accepted: bool,
}

impl SideState {
    pub fn is_populated(&self) -> bool {
        self.actor.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked_offer.is_some()
    }

    fn holds(&self, actor: ActorId) -> bool {
        self.actor.as_ref().map(|s| s.actor.id) == Some(actor)
    }
}

// =============================================================================
// Transition outcomes
// =============================================================================

/// Result of claiming a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First actor in; now waiting for the counterpart
    Opened,
    /// Second actor in; both sides may prepare
    Paired,
    /// The actor already held this side (reconnect or duplicate delivery)
    Resumed,
}

/// Result of locking a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Locked; the counterpart has not locked yet
    Locked,
    /// Both sides are now locked and the session entered DECIDING
    Deciding,
}

/// Result of accepting.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// Accepted; waiting on the counterpart
    Accepted,
    /// Both accepted; the offers must now be swapped
    Settled(Settlement),
}

/// One populated side leaving a closing session.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementParty {
    pub side: Side,
    pub session: ActorSession,
    pub reason: SettlementReason,
    /// Locked offer, if the side had locked
    pub locked_offer: Option<Slots>,
}

/// Everything the caller needs to move items when a session closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub key: SessionKey,
    /// `true`: deliver each side's container to the other party.
    /// `false`: return each side's container to its own party.
    pub swap: bool,
    pub parties: Vec<SettlementParty>,
    /// SETTLED when both sides were populated, EMPTY for a lone vacate
    pub final_status: TradeStatus,
}

impl Settlement {
    pub fn party(&self, side: Side) -> Option<&SettlementParty> {
        self.parties.iter().find(|p| p.side == side)
    }
}

// =============================================================================
// Trade Session
// =============================================================================

/// The state machine for one active exchange.
///
/// # Invariants
/// - A live session has at least one populated side
/// - DECIDING and ACCEPTED_SIDE_n require both sides locked
/// - Status rank never decreases; closing clears both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSession {
    pub key: SessionKey,
    sides: [SideState; 2],
    status: TradeStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeSession {
    /// Create an empty session for a linked pair
    pub fn new(key: SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            sides: [SideState::default(), SideState::default()],
            status: TradeStatus::Empty,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    pub fn side(&self, side: Side) -> &SideState {
        &self.sides[side.index()]
    }

    fn side_mut(&mut self, side: Side) -> &mut SideState {
        &mut self.sides[side.index()]
    }

    pub fn actor(&self, side: Side) -> Option<&ActorSession> {
        self.side(side).actor.as_ref()
    }

    /// Side held by `actor`, if any
    pub fn side_of(&self, actor: ActorId) -> Option<Side> {
        Side::ALL.into_iter().find(|side| self.side(*side).holds(actor))
    }

    pub fn populated_sides(&self) -> Vec<Side> {
        Side::ALL
            .into_iter()
            .filter(|side| self.side(*side).is_populated())
            .collect()
    }

    pub fn is_vacant(&self) -> bool {
        self.populated_sides().is_empty()
    }

    /// True while the side's actor may still add or remove container items
    pub fn can_modify(&self, side: Side) -> bool {
        let state = self.side(side);
        state.is_populated()
            && !state.is_locked()
            && matches!(self.status, TradeStatus::WaitingForSecond | TradeStatus::Preparing)
    }

    /// Counterpart's locked offer, visible only once both sides locked
    pub fn counterpart_offer(&self, side: Side) -> Option<&Slots> {
        match self.status {
            TradeStatus::Deciding | TradeStatus::Accepted(_) => {
                self.side(side.other()).locked_offer.as_ref()
            },
            _ => None,
        }
    }

    /// Who the session is waiting on, for user-facing messages
    pub fn waiting_on(&self) -> String {
        let name = |side: Side| {
            self.actor(side)
                .map(|s| s.actor.name.clone())
                .unwrap_or_else(|| "a second trader".to_string())
        };
        match self.status {
            TradeStatus::Empty => "nobody".to_string(),
            TradeStatus::WaitingForSecond => {
                let missing = Side::ALL
                    .into_iter()
                    .find(|s| !self.side(*s).is_populated())
                    .unwrap_or(Side::Two);
                format!("a trader at {}", self.key.endpoint(missing))
            },
            TradeStatus::Preparing => format!("{} and {} to lock", name(Side::One), name(Side::Two)),
            TradeStatus::Locked(side) => format!("{} to lock", name(side.other())),
            TradeStatus::Deciding => {
                format!("{} and {} to decide", name(Side::One), name(Side::Two))
            },
            TradeStatus::Accepted(side) => format!("{} to decide", name(side.other())),
            TradeStatus::Settled => "nobody".to_string(),
        }
    }

    /// Record that the session changed at `now`.
    ///
    /// Transitions do not read a clock; the owner stamps the session.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn ensure_live(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::precondition(self.status, "the trade is already settled"));
        }
        Ok(())
    }

    fn ensure_populated(&self, side: Side) -> Result<(), TransitionError> {
        if !self.side(side).is_populated() {
            return Err(TransitionError::precondition(
                self.status,
                format!("nobody is trading at {}", self.key.endpoint(side)),
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Put `actor` on `side`.
    ///
    /// Claiming a side the actor already holds is a resume, not an error.
    pub fn claim(&mut self, side: Side, actor: ActorRef) -> Result<ClaimOutcome, TransitionError> {
        self.ensure_live()?;

        if let Some(existing) = self.side_mut(side).actor.as_mut() {
            if existing.actor.id == actor.id {
                existing.actor.name = actor.name;
                existing.mark_online();
                return Ok(ClaimOutcome::Resumed);
            }
            let holder = existing.actor.name.clone();
            return Err(TransitionError::precondition(
                self.status,
                format!("{} is already in use by {}", self.key.endpoint(side), holder),
            ));
        }

        if self.side(side.other()).holds(actor.id) {
            return Err(TransitionError::precondition(
                self.status,
                format!("you are already trading at {}", self.key.endpoint(side.other())),
            ));
        }

        if !matches!(self.status, TradeStatus::Empty | TradeStatus::WaitingForSecond) {
            return Err(TransitionError::InvariantViolation {
                key: self.key.to_string(),
                message: format!("{} is vacant while status is {}", side, self.status),
            });
        }

        self.side_mut(side).actor = Some(ActorSession::new(actor));

        if self.side(side.other()).is_populated() {
            self.status = TradeStatus::Preparing;
            Ok(ClaimOutcome::Paired)
        } else {
            self.status = TradeStatus::WaitingForSecond;
            Ok(ClaimOutcome::Opened)
        }
    }

    /// Declare `side`'s container final, snapshotting `offer`.
    pub fn lock(&mut self, side: Side, offer: Slots) -> Result<LockOutcome, TransitionError> {
        self.ensure_live()?;
        self.ensure_populated(side)?;

        if self.side(side).is_locked() {
            return Err(TransitionError::precondition(
                self.status,
                format!("you already locked your offer; waiting for {}", self.waiting_on()),
            ));
        }

        match self.status {
            TradeStatus::Preparing => {
                self.side_mut(side).locked_offer = Some(offer);
                self.status = TradeStatus::Locked(side);
                Ok(LockOutcome::Locked)
            },
            TradeStatus::Locked(locked) if locked == side.other() => {
                self.side_mut(side).locked_offer = Some(offer);
                self.enter_deciding()?;
                Ok(LockOutcome::Deciding)
            },
            TradeStatus::WaitingForSecond => Err(TransitionError::precondition(
                self.status,
                format!("you cannot lock yet; waiting for {}", self.waiting_on()),
            )),
            _ => Err(TransitionError::precondition(
                self.status,
                "offers can no longer be locked",
            )),
        }
    }

    /// Enter DECIDING once both sides are locked.
    ///
    /// Returns `true` only on the call that performs the transition.
    pub fn enter_deciding(&mut self) -> Result<bool, TransitionError> {
        if self.status == TradeStatus::Deciding {
            return Ok(false);
        }
        if !Side::ALL.into_iter().all(|s| self.side(s).is_locked()) {
            return Err(TransitionError::precondition(self.status, "both offers must be locked"));
        }
        if self.status.rank() > TradeStatus::Deciding.rank() {
            return Ok(false);
        }
        self.status = TradeStatus::Deciding;
        Ok(true)
    }

    /// Accept the counterpart's offer.
    pub fn accept(&mut self, side: Side) -> Result<AcceptOutcome, TransitionError> {
        self.ensure_live()?;
        self.ensure_populated(side)?;

        if self.side(side).accepted {
            return Err(TransitionError::precondition(
                self.status,
                format!("you already accepted; waiting for {}", self.waiting_on()),
            ));
        }

        match self.status {
            TradeStatus::Deciding => {
                self.check_locked_pair()?;
                self.side_mut(side).accepted = true;
                self.status = TradeStatus::Accepted(side);
                Ok(AcceptOutcome::Accepted)
            },
            TradeStatus::Accepted(other) if other == side.other() => {
                self.check_locked_pair()?;
                self.side_mut(side).accepted = true;
                let settlement = self.close(true, |_| SettlementReason::Accepted);
                Ok(AcceptOutcome::Settled(settlement))
            },
            _ => Err(TransitionError::precondition(
                self.status,
                format!("both offers must be locked before deciding; waiting for {}", self.waiting_on()),
            )),
        }
    }

    /// Reject the counterpart's offer. Only while deciding and not yet accepted.
    pub fn reject(&mut self, side: Side) -> Result<Settlement, TransitionError> {
        self.ensure_live()?;
        self.ensure_populated(side)?;

        if self.side(side).accepted {
            return Err(TransitionError::precondition(
                self.status,
                "you already accepted this trade; cancel instead",
            ));
        }

        match self.status {
            TradeStatus::Deciding | TradeStatus::Accepted(_) => {
                Ok(self.close(false, |_| SettlementReason::Rejected))
            },
            _ => Err(TransitionError::precondition(
                self.status,
                format!("there is no offer to reject yet; waiting for {}", self.waiting_on()),
            )),
        }
    }

    /// Cancel the trade, returning each side's own items.
    ///
    /// With no counterpart present this is a plain vacate back to EMPTY.
    pub fn cancel(&mut self, side: Side) -> Result<Settlement, TransitionError> {
        self.ensure_live()?;
        self.ensure_populated(side)?;
        Ok(self.close(false, |_| SettlementReason::Cancelled))
    }

    /// Force-settle because of an internal inconsistency.
    pub fn abort(&mut self) -> Option<Settlement> {
        if self.status.is_terminal() || self.is_vacant() {
            return None;
        }
        Some(self.close(false, |_| SettlementReason::Error))
    }

    /// Mark a side's actor offline.
    pub fn disconnect(&mut self, actor: ActorId, at: DateTime<Utc>) -> Option<Side> {
        let side = self.side_of(actor)?;
        if let Some(session) = self.side_mut(side).actor.as_mut() {
            session.mark_offline(at);
        }
        Some(side)
    }

    /// Mark a side's actor online again.
    pub fn reconnect(&mut self, actor: ActorId) -> Option<Side> {
        let side = self.side_of(actor)?;
        if let Some(session) = self.side_mut(side).actor.as_mut() {
            session.mark_online();
        }
        Some(side)
    }

    /// Sides whose actors exceeded the grace period at `now`
    pub fn expired_sides(&self, now: DateTime<Utc>, grace: Duration) -> Vec<Side> {
        Side::ALL
            .into_iter()
            .filter(|side| {
                self.actor(*side)
                    .map(|s| s.grace_expired(now, grace))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Force-settle on offline timeout, independent of status.
    ///
    /// Expired sides settle as SELF_TIMEOUT; any other populated side as
    /// COUNTERPART_TIMEOUT. Returns `None` when nothing has expired or the
    /// session already closed, so re-running a sweep is a no-op.
    pub fn expire(&mut self, now: DateTime<Utc>, grace: Duration) -> Option<Settlement> {
        if self.status.is_terminal() || self.is_vacant() {
            return None;
        }
        let expired = self.expired_sides(now, grace);
        if expired.is_empty() {
            return None;
        }
        Some(self.close(false, |side| {
            if expired.contains(&side) {
                SettlementReason::SelfTimeout
            } else {
                SettlementReason::CounterpartTimeout
            }
        }))
    }

    /// Shift offline timestamps, e.g. to discount server downtime.
    ///
    /// Sides with no logout timestamp are treated as having logged out at
    /// `assume_logout`.
    pub fn rebase_offline(&mut self, assume_logout: DateTime<Utc>, shift: Duration) {
        for side in Side::ALL {
            if let Some(session) = self.side_mut(side).actor.as_mut() {
                let base = session.logout_at.unwrap_or(assume_logout);
                session.logout_at = Some(base + shift);
            }
        }
    }

    /// Verify the status agrees with the side fields.
    pub fn check_invariants(&self) -> Result<(), TransitionError> {
        let populated = self.populated_sides().len();
        let locked: Vec<Side> = Side::ALL
            .into_iter()
            .filter(|s| self.side(*s).is_locked())
            .collect();
        let accepted: Vec<Side> = Side::ALL
            .into_iter()
            .filter(|s| self.side(*s).accepted)
            .collect();

        let ok = match self.status {
            TradeStatus::Empty | TradeStatus::Settled => populated == 0,
            TradeStatus::WaitingForSecond => populated == 1 && locked.is_empty(),
            TradeStatus::Preparing => populated == 2 && locked.is_empty(),
            TradeStatus::Locked(side) => populated == 2 && locked == vec![side],
            TradeStatus::Deciding => populated == 2 && locked.len() == 2 && accepted.is_empty(),
            TradeStatus::Accepted(side) => {
                populated == 2 && locked.len() == 2 && accepted == vec![side]
            },
        };

        if ok {
            Ok(())
        } else {
            Err(TransitionError::InvariantViolation {
                key: self.key.to_string(),
                message: format!(
                    "status {} with {} populated, {} locked, {} accepted",
                    self.status,
                    populated,
                    locked.len(),
                    accepted.len()
                ),
            })
        }
    }

    fn check_locked_pair(&self) -> Result<(), TransitionError> {
        if Side::ALL.into_iter().all(|s| self.side(s).is_locked()) {
            Ok(())
        } else {
            Err(TransitionError::InvariantViolation {
                key: self.key.to_string(),
                message: format!("status {} without both offers locked", self.status),
            })
        }
    }

    /// Tear the session down, reporting every populated side.
    fn close(&mut self, swap: bool, reason_for: impl Fn(Side) -> SettlementReason) -> Settlement {
        let populated = self.populated_sides();
        let final_status = if populated.len() == 2 {
            TradeStatus::Settled
        } else {
            TradeStatus::Empty
        };

        let parties = populated
            .into_iter()
            .filter_map(|side| {
                let state = std::mem::take(self.side_mut(side));
                state.actor.map(|session| SettlementParty {
                    side,
                    session,
                    reason: reason_for(side),
                    locked_offer: state.locked_offer,
                })
            })
            .collect();

        self.sides = [SideState::default(), SideState::default()];
        self.status = final_status;

        Settlement {
            key: self.key.clone(),
            swap,
            parties,
            final_status,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
