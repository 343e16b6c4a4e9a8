// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orphan discovery, adoption, and health checking.
//!
//! An orphan is a session alive on the worker fleet with no matching
//! registry record, typically the leftovers of a crashed import, a deleted
//! record, or a fleet restored from a snapshot. Orphans are only ever
//! adopted explicitly, with a human-supplied name; no automatic adoption is
//! performed. The health check diagnoses both directions (fleet-only
//! sessions and registry rows pointing at vanished sessions) without
//! mutating anything.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use zaplink_fleet::Fleet;
use zaplink_registry::{AdoptInstance, InstanceRecord, Registry};

use crate::error::{ReconcileError, Result};
use crate::loop_guard::LoopGuard;
use crate::status::normalize;

/// A fleet session with no registry record. Ephemeral: produced by a scan,
/// consumed by adoption, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanCandidate {
    /// Session identifier on the worker fleet.
    pub worker_instance_id: String,
    /// Raw status reported by the fleet.
    pub status: String,
    /// Phone number, if the session has paired.
    pub phone: Option<String>,
    /// Profile name, if known.
    pub profile_name: Option<String>,
    /// Company name configured on the worker, if any.
    pub company_name: Option<String>,
}

/// One registry/fleet mismatch found by the health check.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inconsistency {
    /// A session exists on the fleet with no registry record.
    OrphanOnFleet {
        /// Fleet session id.
        worker_instance_id: String,
        /// Raw fleet status.
        status: String,
    },
    /// A registry record points at a session the fleet no longer has.
    MissingOnFleet {
        /// Registry record name.
        name: String,
        /// Fleet session id the record points at.
        worker_instance_id: String,
        /// Persisted connection state of the record.
        connection_state: String,
    },
}

/// Non-mutating cross-check of registry vs. fleet.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HealthCheckReport {
    /// Sessions on the fleet with no registry record.
    pub orphan_count: usize,
    /// Registry records whose fleet session is gone.
    pub missing_count: usize,
    /// Every mismatch found, in both directions.
    pub inconsistencies: Vec<Inconsistency>,
    /// Human-readable suggested actions.
    pub recommendations: Vec<String>,
}

/// Fleet/registry diffing and explicit adoption.
pub struct OrphanReconciler {
    registry: Arc<dyn Registry>,
    fleet: Arc<dyn Fleet>,
    guard: LoopGuard,
}

impl OrphanReconciler {
    /// Create a reconciler over the given collaborators.
    pub fn new(registry: Arc<dyn Registry>, fleet: Arc<dyn Fleet>, guard: LoopGuard) -> Self {
        Self {
            registry,
            fleet,
            guard,
        }
    }

    /// Sessions present on the fleet but absent from the registry.
    pub async fn scan_for_orphans(&self) -> Result<Vec<OrphanCandidate>> {
        let sessions = self.list_fleet_sessions().await?;
        let known = self.known_worker_ids().await?;

        let orphans: Vec<OrphanCandidate> = sessions
            .into_iter()
            .filter(|s| !known.contains(&s.instance_id))
            .map(|s| OrphanCandidate {
                worker_instance_id: s.instance_id,
                status: s.status,
                phone: s.phone,
                profile_name: s.profile_name,
                company_name: s.company_name,
            })
            .collect();

        if orphans.is_empty() {
            info!("No orphan sessions found on the fleet");
        } else {
            warn!(count = orphans.len(), "Found orphan sessions on the fleet");
        }

        Ok(orphans)
    }

    /// Adopt an orphan session into the registry.
    ///
    /// Verifies the session is still alive on the fleet, then creates a
    /// record bound to it (or binds to the existing record when another
    /// adoption won the race). The candidate's phone and profile metadata
    /// are carried over, but never overwrite values already present on an
    /// existing record.
    pub async fn adopt_orphan(
        &self,
        candidate: &OrphanCandidate,
        name: &str,
        tenant_id: &str,
    ) -> Result<InstanceRecord> {
        let worker_id = &candidate.worker_instance_id;

        let endpoint = format!("status/{worker_id}");
        if !self.guard.record_request(&endpoint) {
            return Err(ReconcileError::LoopBlocked { endpoint });
        }

        let raw_status = self
            .fleet
            .instance_status(worker_id)
            .await
            .map_err(|e| match e {
                e if e.is_transient() => ReconcileError::Fleet(e),
                _ => ReconcileError::OrphanGone(worker_id.clone()),
            })?;

        let state = normalize(&raw_status, None);

        let record = self
            .registry
            .adopt(AdoptInstance {
                tenant_id: tenant_id.to_string(),
                name: name.to_string(),
                worker_instance_id: worker_id.clone(),
                connection_state: state.as_str().to_string(),
                phone: candidate.phone.clone(),
                profile_name: candidate.profile_name.clone(),
            })
            .await?;

        info!(
            instance_id = %record.id,
            worker_instance_id = %worker_id,
            connection_state = %record.connection_state,
            "Adopted orphan session"
        );

        Ok(record)
    }

    /// Locate a scan candidate by fleet session id and adopt it.
    pub async fn adopt_by_worker_id(
        &self,
        worker_instance_id: &str,
        name: &str,
        tenant_id: &str,
    ) -> Result<InstanceRecord> {
        let sessions = self.list_fleet_sessions().await?;
        let candidate = sessions
            .into_iter()
            .find(|s| s.instance_id == worker_instance_id)
            .map(|s| OrphanCandidate {
                worker_instance_id: s.instance_id,
                status: s.status,
                phone: s.phone,
                profile_name: s.profile_name,
                company_name: s.company_name,
            })
            .ok_or_else(|| ReconcileError::OrphanGone(worker_instance_id.to_string()))?;

        self.adopt_orphan(&candidate, name, tenant_id).await
    }

    /// Cross-check registry and fleet in both directions.
    ///
    /// Produces counts, the full mismatch list, and textual
    /// recommendations. Mutates nothing: fixing an inconsistency always
    /// goes through an explicit adoption or recovery action.
    pub async fn perform_health_check(&self) -> Result<HealthCheckReport> {
        let sessions = self.list_fleet_sessions().await?;
        let records = self.registry.list(None).await?;

        let fleet_ids: HashSet<&str> = sessions.iter().map(|s| s.instance_id.as_str()).collect();
        let known: HashSet<&str> = records
            .iter()
            .filter_map(|r| r.worker_instance_id.as_deref())
            .collect();

        let mut report = HealthCheckReport::default();

        for session in &sessions {
            if !known.contains(session.instance_id.as_str()) {
                report.orphan_count += 1;
                report.inconsistencies.push(Inconsistency::OrphanOnFleet {
                    worker_instance_id: session.instance_id.clone(),
                    status: session.status.clone(),
                });
            }
        }

        for record in &records {
            if let Some(worker_id) = record.worker_instance_id.as_deref()
                && !fleet_ids.contains(worker_id)
            {
                report.missing_count += 1;
                report.inconsistencies.push(Inconsistency::MissingOnFleet {
                    name: record.name.clone(),
                    worker_instance_id: worker_id.to_string(),
                    connection_state: record.connection_state.clone(),
                });
            }
        }

        if report.orphan_count > 0 {
            report.recommendations.push(format!(
                "{} orphan session(s) on the fleet - adopt them or delete the sessions",
                report.orphan_count
            ));
        }
        if report.missing_count > 0 {
            report.recommendations.push(format!(
                "{} registry record(s) point at sessions no longer on the fleet - \
                 reconnect or delete the records",
                report.missing_count
            ));
        }
        if report.inconsistencies.is_empty() {
            report
                .recommendations
                .push("Registry and fleet are consistent".to_string());
        }

        info!(
            orphans = report.orphan_count,
            missing = report.missing_count,
            "Health check completed"
        );

        Ok(report)
    }

    async fn list_fleet_sessions(&self) -> Result<Vec<zaplink_fleet::FleetSession>> {
        if !self.guard.record_request("instances") {
            return Err(ReconcileError::LoopBlocked {
                endpoint: "instances".to_string(),
            });
        }
        Ok(self.fleet.list_instances().await?)
    }

    async fn known_worker_ids(&self) -> Result<HashSet<String>> {
        let records = self.registry.list(None).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.worker_instance_id)
            .collect())
    }
}
