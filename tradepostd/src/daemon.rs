//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Coordinator (endpoints, sessions, settlements)
//! - Reconciler (offline grace period sweeps)
//! - Event Bus (internal communication)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Restore endpoints, sessions and backlogs from store
//! 4. Start reconciler and API server
//! 5. Main event loop
//! 6. Graceful shutdown on SIGINT, recording the stop time

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use tradepost_domain::{Clock, SystemClock, TradeEvent};
use tradepost_exec::{StubWorld, WorldPort};
use tradepost_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::reconciler::Reconciler;
use crate::views::RestoreReport;

// =============================================================================
// Daemon
// =============================================================================

/// The main tradepost daemon.
pub struct Daemon<W: WorldPort + 'static, S: Store + 'static> {
    /// Configuration
    config: Config,
    /// Trade coordinator, the single point of serialization
    coordinator: Arc<RwLock<Coordinator<W, S>>>,
    /// Event bus
    event_bus: Arc<EventBus>,
}

impl Daemon<StubWorld, MemoryStore> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(StubWorld::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }
}

impl<W: WorldPort + 'static, S: Store + 'static> Daemon<W, S> {
    /// Create a new daemon with provided components.
    pub fn new(config: Config, world: Arc<W>, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let event_bus = Arc::new(EventBus::new(1000));
        let coordinator = Arc::new(RwLock::new(Coordinator::new(
            world,
            store,
            event_bus.clone(),
            clock,
            config.trade.clone(),
        )));

        Self {
            config,
            coordinator,
            event_bus,
        }
    }

    pub fn coordinator(&self) -> &Arc<RwLock<Coordinator<W, S>>> {
        &self.coordinator
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting tradepost daemon"
        );

        // 1. Restore persisted state
        self.restore().await?;

        // 2. Start reconciler
        let reconciler = Arc::new(Reconciler::new(
            self.coordinator.clone(),
            self.config.trade.sweep_interval,
        ));
        let reconciler_handle = reconciler.clone().start();

        // 3. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 4. Subscribe to event bus
        let mut event_receiver = self.event_bus.subscribe();

        // 5. Main event loop
        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event_result) = event_receiver.recv() => {
                    match event_result {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(event) {
                                if matches!(e, DaemonError::Shutdown) {
                                    break;
                                }
                                error!(error = %e, "Error handling event");
                            }
                        }
                        Err(lag_msg) => {
                            warn!(%lag_msg, "Event receiver lagged");
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // 6. Graceful shutdown
        reconciler.stop();
        if let Err(e) = reconciler_handle.await {
            warn!(error = %e, "Reconciler task did not stop cleanly");
        }
        self.shutdown().await?;

        Ok(())
    }

    /// Load persisted state into the coordinator.
    async fn restore(&self) -> DaemonResult<RestoreReport> {
        let report = self.coordinator.write().await.restore().await?;

        if report.endpoints == 0 && report.sessions == 0 {
            info!("No persisted state to restore");
        }
        for warning in &report.warnings {
            warn!(%warning, "Restore warning");
        }

        Ok(report)
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            coordinator: self.coordinator.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    /// Handle an event from the event bus.
    fn handle_event(&self, event: DaemonEvent) -> DaemonResult<()> {
        match event {
            DaemonEvent::StatusChanged {
                key,
                previous,
                new,
                ..
            } => {
                info!(%key, %previous, %new, "Trade status changed");
            },

            DaemonEvent::Trade(TradeEvent::Settled {
                key,
                reasons,
                final_status,
                ..
            }) => {
                info!(%key, ?reasons, %final_status, "Trade settled");
            },

            DaemonEvent::Trade(event) => {
                debug!(event_type = event.event_type(), "Trade event");
            },

            DaemonEvent::SweepCompleted {
                settled, failures, ..
            } => {
                if failures > 0 {
                    warn!(settled, failures, "Sweep completed with failures");
                } else {
                    info!(settled, "Sweep completed");
                }
            },

            DaemonEvent::Shutdown => {
                info!("Shutdown event received");
                return Err(DaemonError::Shutdown);
            },
        }

        Ok(())
    }

    /// Graceful shutdown.
    ///
    /// Records the stop time so that the next startup can discount the
    /// downtime from every offline grace period.
    async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        let coordinator = self.coordinator.read().await;
        if let Err(e) = coordinator.record_stop().await {
            error!(error = %e, "Failed to record stop time");
        }
        self.event_bus.send(DaemonEvent::Shutdown);

        info!(active_sessions = coordinator.session_count(), "Shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tradepost_domain::{ActorId, ActorRef, ContainerRef, EndpointName, ManualClock};
    use tradepost_store::LifecycleRepository;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test());

        let coordinator = daemon.coordinator.read().await;
        assert_eq!(coordinator.session_count(), 0);
        assert!(coordinator.list_endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test());

        let addr = daemon.start_api_server().await.unwrap();
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_daemon_restore_empty() {
        let daemon = Daemon::new_stub(Config::test());

        let report = daemon.restore().await.unwrap();
        assert_eq!(report.endpoints, 0);
        assert_eq!(report.sessions, 0);
        assert_eq!(report.downtime_secs, None);
    }

    #[tokio::test]
    async fn test_shutdown_records_stop_time() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let daemon = Daemon::new(
            Config::test(),
            Arc::new(StubWorld::new()),
            store.clone(),
            clock.clone(),
        );

        daemon.shutdown().await.unwrap();
        assert_eq!(store.lifecycle().load_stop().await.unwrap(), Some(clock.now()));
    }

    #[tokio::test]
    async fn test_restart_restores_session_from_store() {
        let store = Arc::new(MemoryStore::new());
        let world = Arc::new(StubWorld::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let north = EndpointName::new("north").unwrap();
        let south = EndpointName::new("south").unwrap();
        let alice = ActorRef::new(ActorId::generate(), "alice").unwrap();

        let first = Daemon::new(Config::test(), world.clone(), store.clone(), clock.clone());
        {
            let mut coordinator = first.coordinator.write().await;
            for name in [&north, &south] {
                coordinator
                    .create_endpoint(name.clone(), ContainerRef(format!("chest:{}", name)), None)
                    .await
                    .unwrap();
            }
            coordinator.link_endpoints(&north, &south).await.unwrap();
            coordinator.begin_use(alice.clone(), &north).await.unwrap();
        }
        first.shutdown().await.unwrap();

        clock.advance(Duration::seconds(600));
        let second = Daemon::new(Config::test(), world, store, clock);
        let report = second.restore().await.unwrap();

        assert_eq!(report.endpoints, 2);
        assert_eq!(report.sessions, 1);
        assert_eq!(report.downtime_secs, Some(600));
        let coordinator = second.coordinator.read().await;
        assert!(coordinator.session_of(alice.id).is_some());
    }
}
