//! Periodic maintenance scheduler.
//!
//! A single interval task that sweeps every lobby on a fixed tick:
//! time-driven transitions, stale-lobby cancellation, standing-lobby
//! provisioning, and terminal pruning. Reads and mutations also advance
//! lobbies on demand, so a missed tick delays nothing observable; the
//! ticker exists so idle lobbies resolve and archive without traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::service::lobby_service::LobbyService;

/// Owns the background maintenance loop.
#[derive(Debug)]
pub struct Scheduler {
    service: Arc<LobbyService>,
    tick_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler ticking every `tick_interval_ms` milliseconds.
    #[must_use]
    pub fn new(service: Arc<LobbyService>, tick_interval_ms: u64) -> Self {
        Self {
            service,
            tick_interval: Duration::from_millis(tick_interval_ms.max(1)),
        }
    }

    /// Spawns the maintenance loop onto the runtime.
    ///
    /// The loop runs until the returned handle is aborted or the runtime
    /// shuts down. A failed sweep is logged and the loop keeps ticking.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = self.tick_interval.as_millis() as u64, "scheduler started");
            loop {
                ticker.tick().await;
                match self.service.run_maintenance().await {
                    Ok(report) => {
                        if !report.is_noop() {
                            tracing::debug!(
                                advanced = report.advanced,
                                cancelled = report.cancelled,
                                provisioned = report.provisioned,
                                pruned = report.pruned,
                                "maintenance sweep applied changes"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::error!(%err, "maintenance sweep failed");
                    }
                }
            }
        })
    }
}
