//! Offline reconciliation scheduler.
//!
//! Runs `Coordinator::sweep` on a fixed cadence. Explicit disconnects are
//! reconciled immediately by the coordinator itself; this task catches the
//! sessions whose grace period runs out while nobody is calling in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tradepost_exec::WorldPort;
use tradepost_store::Store;

use crate::coordinator::Coordinator;

/// Periodic sweep task.
pub struct Reconciler<W: WorldPort + 'static, S: Store + 'static> {
    coordinator: Arc<RwLock<Coordinator<W, S>>>,
    interval: Duration,
    /// Shutdown token
    shutdown_token: CancellationToken,
}

impl<W: WorldPort + 'static, S: Store + 'static> Reconciler<W, S> {
    pub fn new(coordinator: Arc<RwLock<Coordinator<W, S>>>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the sweep loop in the background.
    ///
    /// Returns a JoinHandle that can be awaited or aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Reconciler started");

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Reconciler received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        let report = self.coordinator.write().await.sweep().await;
                        debug!(
                            examined = report.examined,
                            settled = report.settled.len(),
                            failures = report.failures,
                            "Sweep tick"
                        );
                    }
                }
            }

            info!("Reconciler stopped");
        })
    }

    /// Stop the loop after the current tick.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }
}
