// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for periodic recovery sweeps.
//!
//! Runs [`RecoveryPoller::recover_pending_instances`] on a fixed interval
//! so instances stuck in a transitional state get reconciled without a
//! manual trigger. The same sweep is also reachable through `POST /sync`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};
use zaplink_reconciler::RecoveryPoller;

/// Configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// How often to run the recovery sweep.
    pub interval: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
        }
    }
}

/// Background worker that periodically recovers pending instances.
pub struct SyncWorker {
    poller: Arc<RecoveryPoller>,
    config: SyncWorkerConfig,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    /// Create a new sync worker.
    pub fn new(poller: Arc<RecoveryPoller>, config: SyncWorkerConfig) -> Self {
        Self {
            poller,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sync worker loop. Exits when the shutdown signal arrives.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    match self.poller.recover_pending_instances().await {
                        Ok(report) if report.recovered > 0 || !report.errors.is_empty() => {
                            info!(
                                recovered = report.recovered,
                                errors = report.errors.len(),
                                "Scheduled recovery sweep completed"
                            );
                        }
                        Ok(_) => {
                            debug!("Scheduled recovery sweep found nothing to do");
                        }
                        Err(e) => {
                            error!(error = %e, "Scheduled recovery sweep failed");
                        }
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }
}
