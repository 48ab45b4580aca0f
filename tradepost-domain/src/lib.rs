//! Tradepost Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains value objects, entities, the trade session state machine and
//! domain events.

#![warn(clippy::all)]

// Public modules
pub mod clock;
pub mod entities;
pub mod events;
pub mod session;
pub mod value_objects;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::{
    ActorSession, Endpoint, LinkState, LostAndFound, OfflineSettlement, SettlementReason,
};
pub use events::TradeEvent;
pub use session::{
    AcceptOutcome, ClaimOutcome, LockOutcome, SessionKey, Settlement, SettlementParty, SideState,
    TradeSession, TradeStatus, TransitionError,
};
pub use value_objects::{
    is_vacant, stacks_of, tally, ActorId, ActorRef, ContainerRef, DomainError, EndpointName,
    ItemKind, ItemStack, Location, Side, Slots,
};
