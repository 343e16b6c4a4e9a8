// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection state tracking and heartbeat supervision.
//!
//! The tracker is a process-local cache of the last observed connection
//! state per instance; the registry remains the source of truth and the
//! cache is rebuilt from scratch after a restart. Connected instances get a
//! heartbeat task that detects workers that died silently: if no status
//! update arrives within the timeout while the instance is supposed to be
//! connected, the instance is force-transitioned to `timeout` with a
//! synthetic error message.
//!
//! Every heartbeat task's abort handle is tracked per instance, so instance
//! removal and shutdown cancel exactly the tasks they own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::status::{UnifiedState, normalize};

/// Configuration for the connection tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often each instance's heartbeat task checks for staleness.
    pub heartbeat_interval: Duration,
    /// Maximum time since the last update before a connected instance is
    /// force-transitioned to `timeout`.
    pub heartbeat_timeout: Duration,
    /// Minimum time since the last update before a failed instance becomes
    /// retry-eligible.
    pub retry_cooldown: Duration,
    /// Maximum retry count before an instance is no longer retry-eligible.
    pub max_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(300),
            retry_cooldown: Duration::from_secs(300),
            max_retries: 5,
        }
    }
}

/// Cached connection state of one instance. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    /// Last normalized status.
    pub status: UnifiedState,
    /// When the status was last observed (or force-transitioned).
    pub last_update: DateTime<Utc>,
    /// Number of transitions into `error`; reset on reconnect.
    pub retry_count: u32,
    /// Whether a heartbeat task is supervising this instance.
    pub heartbeat_active: bool,
    /// Error message from the last failure, if any.
    pub error_message: Option<String>,
}

enum HeartbeatCheck {
    Alive,
    Expired,
    Stopped,
}

struct TrackerInner {
    states: DashMap<Uuid, ConnectionState>,
    heartbeats: DashMap<Uuid, AbortHandle>,
    config: TrackerConfig,
}

impl TrackerInner {
    /// One heartbeat tick for one instance: force-transition to `timeout`
    /// when the last update is older than the configured timeout.
    fn check_stale(&self, id: Uuid) -> HeartbeatCheck {
        let Some(mut state) = self.states.get_mut(&id) else {
            return HeartbeatCheck::Stopped;
        };
        if !state.heartbeat_active {
            return HeartbeatCheck::Stopped;
        }

        let age = Utc::now().signed_duration_since(state.last_update);
        let stale = age
            .to_std()
            .map(|age| age > self.config.heartbeat_timeout)
            .unwrap_or(false);
        if !stale {
            return HeartbeatCheck::Alive;
        }

        warn!(
            instance_id = %id,
            seconds_since_update = age.num_seconds(),
            "Connected instance stopped sending updates, forcing timeout"
        );

        state.status = UnifiedState::Timeout;
        state.heartbeat_active = false;
        state.error_message = Some(format!(
            "No status update for {}s while connected",
            age.num_seconds()
        ));
        state.last_update = Utc::now();

        HeartbeatCheck::Expired
    }
}

/// Per-instance connection state store with heartbeat supervision.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    /// Create a tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                states: DashMap::new(),
                heartbeats: DashMap::new(),
                config,
            }),
        }
    }

    /// Record a status observation for an instance.
    ///
    /// Normalizes the raw status, applies the retry-count rules, flips
    /// `heartbeat_active`, and starts or stops the heartbeat task. The only
    /// side effects are state mutation and timer management; no network
    /// calls originate here.
    pub fn update_status(
        &self,
        instance_id: Uuid,
        raw_worker_status: &str,
        raw_webhook_status: Option<&str>,
        error_message: Option<String>,
    ) -> ConnectionState {
        let next = normalize(raw_worker_status, raw_webhook_status);
        let now = Utc::now();

        let prev = self.inner.states.get(&instance_id).map(|s| s.clone());
        let prev_status = prev.as_ref().map(|s| s.status);
        let prev_retries = prev.as_ref().map(|s| s.retry_count).unwrap_or(0);

        let retry_count = if next.is_connected() {
            0
        } else if next == UnifiedState::Error && prev_status != Some(UnifiedState::Error) {
            prev_retries + 1
        } else {
            prev_retries
        };

        let state = ConnectionState {
            status: next,
            last_update: now,
            retry_count,
            heartbeat_active: next.is_connected(),
            error_message,
        };
        self.inner.states.insert(instance_id, state.clone());

        if prev_status != Some(next) {
            info!(
                instance_id = %instance_id,
                from = %prev_status.map(|s| s.as_str()).unwrap_or("none"),
                to = %next,
                retry_count = retry_count,
                "Connection state changed"
            );
        } else {
            debug!(instance_id = %instance_id, status = %next, "Connection state refreshed");
        }

        if state.heartbeat_active {
            self.ensure_heartbeat(instance_id);
        } else {
            self.stop_heartbeat(instance_id);
        }

        state
    }

    /// Cached state for one instance.
    pub fn get(&self, instance_id: Uuid) -> Option<ConnectionState> {
        self.inner.states.get(&instance_id).map(|s| s.clone())
    }

    /// Cached state for all instances.
    pub fn all(&self) -> Vec<(Uuid, ConnectionState)> {
        self.inner
            .states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Number of instances with an active heartbeat.
    pub fn connected_count(&self) -> usize {
        self.inner
            .states
            .iter()
            .filter(|entry| entry.value().heartbeat_active)
            .count()
    }

    /// Whether a reconnection attempt is currently worthwhile.
    ///
    /// True only for instances in a failed state (`error`, `timeout`,
    /// `disconnected`) whose retry budget is not exhausted and whose last
    /// update is older than the cooldown. The cooldown prevents retry
    /// storms right after a failure.
    pub fn should_retry_connection(&self, instance_id: Uuid) -> bool {
        let Some(state) = self.inner.states.get(&instance_id) else {
            return false;
        };

        let failed = matches!(
            state.status,
            UnifiedState::Error | UnifiedState::Timeout | UnifiedState::Disconnected
        );
        if !failed || state.retry_count >= self.inner.config.max_retries {
            return false;
        }

        Utc::now()
            .signed_duration_since(state.last_update)
            .to_std()
            .map(|age| age > self.inner.config.retry_cooldown)
            .unwrap_or(false)
    }

    /// Discard cached state and cancel the heartbeat for an instance.
    pub fn remove(&self, instance_id: Uuid) {
        self.inner.states.remove(&instance_id);
        self.stop_heartbeat(instance_id);
    }

    /// Cancel all heartbeat tasks and clear the cache.
    pub fn shutdown(&self) {
        for entry in self.inner.heartbeats.iter() {
            entry.value().abort();
        }
        self.inner.heartbeats.clear();
        self.inner.states.clear();
        debug!("Connection tracker shut down");
    }

    fn ensure_heartbeat(&self, instance_id: Uuid) {
        if let Some(handle) = self.inner.heartbeats.get(&instance_id)
            && !handle.is_finished()
        {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(inner.config.heartbeat_interval);
            // The first tick completes immediately; a fresh state is never
            // stale, so consume it before the supervision loop.
            tick.tick().await;
            loop {
                tick.tick().await;
                match inner.check_stale(instance_id) {
                    HeartbeatCheck::Alive => {}
                    HeartbeatCheck::Expired | HeartbeatCheck::Stopped => {
                        inner.heartbeats.remove(&instance_id);
                        break;
                    }
                }
            }
        });

        self.inner
            .heartbeats
            .insert(instance_id, handle.abort_handle());
    }

    fn stop_heartbeat(&self, instance_id: Uuid) {
        if let Some((_, handle)) = self.inner.heartbeats.remove(&instance_id) {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn backdate(&self, instance_id: Uuid, by: Duration) {
        if let Some(mut state) = self.inner.states.get_mut(&instance_id) {
            state.last_update = state.last_update - chrono::Duration::from_std(by).unwrap();
        }
    }

    #[cfg(test)]
    fn check_stale(&self, instance_id: Uuid) -> bool {
        matches!(
            self.inner.check_stale(instance_id),
            HeartbeatCheck::Expired
        )
    }
}
