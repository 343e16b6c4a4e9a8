// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recovery polling.
//!
//! Active reconciliation for instances stuck in a transitional state: ask
//! the worker fleet for ground truth, write what it says back into the
//! tracker and the registry, and back off between attempts. Two entry
//! points:
//!
//! - [`RecoveryPoller::poll_until_resolved`] supervises one instance until
//!   its state settles or the attempt budget runs out;
//! - [`RecoveryPoller::recover_pending_instances`] sweeps the whole cohort
//!   of stalled instances with per-instance failure isolation, intended for
//!   a periodic schedule as well as manual triggering.
//!
//! Every outbound call is gated through the loop guard first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zaplink_fleet::Fleet;
use zaplink_registry::{Registry, StatusPatch};

use crate::error::{ReconcileError, Result};
use crate::loop_guard::LoopGuard;
use crate::retry::{CancelToken, RetryPolicy, retry_with_backoff};
use crate::status::UnifiedState;
use crate::tracker::ConnectionTracker;

/// Persisted states that mean an instance is stuck mid-creation or
/// mid-connect and needs active reconciliation.
pub const TRANSITIONAL_STATES: &[&str] = &["vps_pending", "initializing", "connecting"];

/// Outcome of a bulk recovery sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RecoveryReport {
    /// Instances whose status was successfully synced.
    pub recovered: usize,
    /// Per-instance failures; one entry per instance, the sweep never
    /// aborts early.
    pub errors: Vec<String>,
}

struct SyncOutcome {
    resolved: bool,
}

/// Active reconciliation against the worker fleet.
pub struct RecoveryPoller {
    registry: Arc<dyn Registry>,
    fleet: Arc<dyn Fleet>,
    tracker: ConnectionTracker,
    guard: LoopGuard,
    policy: RetryPolicy,
}

impl RecoveryPoller {
    /// Create a poller over the given collaborators.
    pub fn new(
        registry: Arc<dyn Registry>,
        fleet: Arc<dyn Fleet>,
        tracker: ConnectionTracker,
        guard: LoopGuard,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            fleet,
            tracker,
            guard,
            policy,
        }
    }

    /// Poll the fleet until the instance's state resolves.
    ///
    /// Resolution means the registry's stored state changed, or the fleet
    /// reported `ready`/`waiting_scan`. Transient failures (fleet 5xx,
    /// timeouts, loop-guard refusals) consume an attempt and back off;
    /// non-transient failures abort immediately. Returns `false` after the
    /// attempt budget is spent: the instance keeps its last known state
    /// and is never silently marked ready.
    pub async fn poll_until_resolved(
        &self,
        instance_id: Uuid,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let outcome = retry_with_backoff(&self.policy, cancel, |attempt| async move {
            match self.sync_instance(&instance_id).await {
                Ok(outcome) if outcome.resolved => Ok(Some(true)),
                Ok(_) => {
                    debug!(
                        instance_id = %instance_id,
                        attempt = attempt,
                        "Status not resolved yet"
                    );
                    Ok(None)
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        instance_id = %instance_id,
                        attempt = attempt,
                        error = %e,
                        "Recovery attempt failed, will back off"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        let resolved = outcome.unwrap_or(false);
        if resolved {
            info!(instance_id = %instance_id, "Instance status resolved");
        } else {
            warn!(
                instance_id = %instance_id,
                max_attempts = self.policy.max_attempts,
                "Instance did not resolve within the attempt budget"
            );
        }
        Ok(resolved)
    }

    /// Sweep every instance stuck in a transitional state with one status
    /// sync each. A failing instance is recorded and skipped; the sweep
    /// always covers the whole cohort.
    pub async fn recover_pending_instances(&self) -> Result<RecoveryReport> {
        let pending = self.registry.list_by_states(TRANSITIONAL_STATES).await?;

        if pending.is_empty() {
            debug!("No pending instances to recover");
            return Ok(RecoveryReport::default());
        }

        info!(count = pending.len(), "Recovering pending instances");

        let mut report = RecoveryReport::default();
        for record in &pending {
            match self.sync_instance(&record.id).await {
                Ok(_) => report.recovered += 1,
                Err(e) => {
                    warn!(
                        instance_id = %record.id,
                        name = %record.name,
                        error = %e,
                        "Failed to sync pending instance"
                    );
                    report.errors.push(format!("{}: {}", record.name, e));
                }
            }
        }

        info!(
            recovered = report.recovered,
            errors = report.errors.len(),
            "Recovery sweep completed"
        );

        Ok(report)
    }

    /// One status sync: fetch ground truth from the fleet and write it into
    /// the tracker and the registry.
    async fn sync_instance(&self, instance_id: &Uuid) -> Result<SyncOutcome> {
        let record = self
            .registry
            .get(*instance_id)
            .await?
            .ok_or(ReconcileError::NotFound(*instance_id))?;

        let worker_id = record
            .worker_instance_id
            .as_deref()
            .ok_or(ReconcileError::NotBound(record.id))?;

        let endpoint = format!("status/{worker_id}");
        if !self.guard.record_request(&endpoint) {
            return Err(ReconcileError::LoopBlocked { endpoint });
        }

        let raw_status = self.fleet.instance_status(worker_id).await?;
        let state = self
            .tracker
            .update_status(record.id, &raw_status, None, None);

        let updated = self
            .registry
            .apply_status(record.id, StatusPatch::state(state.status.as_str()))
            .await?;

        let resolved = matches!(
            state.status,
            UnifiedState::Ready | UnifiedState::WaitingScan
        ) || updated.connection_state != record.connection_state;

        Ok(SyncOutcome { resolved })
    }
}
