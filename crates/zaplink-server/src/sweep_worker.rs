// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that bounds loop-guard memory.
//!
//! Endpoint metrics age out after a period of inactivity; this worker runs
//! the purge on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};
use zaplink_reconciler::LoopGuard;

/// Configuration for the guard sweep worker.
#[derive(Debug, Clone)]
pub struct SweepWorkerConfig {
    /// How often to purge idle endpoint metrics.
    pub interval: Duration,
}

impl Default for SweepWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Background worker that periodically purges idle loop-guard endpoints.
pub struct SweepWorker {
    guard: LoopGuard,
    config: SweepWorkerConfig,
    shutdown: Arc<Notify>,
}

impl SweepWorker {
    /// Create a new sweep worker.
    pub fn new(guard: LoopGuard, config: SweepWorkerConfig) -> Self {
        Self {
            guard,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop. Exits when the shutdown signal arrives.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Loop-guard sweep worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Sweep worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    let purged = self.guard.purge_idle();
                    if purged > 0 {
                        debug!(purged = purged, "Purged idle loop-guard endpoints");
                    }
                }
            }
        }

        info!("Sweep worker stopped");
    }
}
