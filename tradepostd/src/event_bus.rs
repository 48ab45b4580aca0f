//! Event bus for internal daemon communication.
//!
//! The coordinator publishes every trade and registry change here; the
//! daemon loop and any other subscriber (audit, tests) consume them.
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tradepost_domain::{SessionKey, TradeEvent, TradeStatus};

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Domain event from the coordinator
    Trade(TradeEvent),

    /// Session status changed
    StatusChanged {
        key: SessionKey,
        previous: TradeStatus,
        new: TradeStatus,
        timestamp: DateTime<Utc>,
    },

    /// Reconciler finished a sweep that settled at least one session
    SweepCompleted {
        settled: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },

    /// Shutdown signal
    Shutdown,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Slow receivers start missing events (lagging) once `capacity` events
    /// are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event, 0 if there
    /// are none.
    pub fn send(&self, event: DaemonEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for daemon events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
