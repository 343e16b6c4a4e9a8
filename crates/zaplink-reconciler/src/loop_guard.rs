// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-endpoint circuit breaker.
//!
//! The loop guard is a client-side protection for the worker fleet: it
//! rate-limits repeated calls to any named remote endpoint so that retry
//! logic elsewhere in the system (including bugs in the recovery poller
//! itself) cannot turn into a request storm. Callers ask
//! [`LoopGuard::record_request`] before every outbound call; a `false`
//! answer means the call must not be made.
//!
//! Detection looks at three signals per endpoint: calls in the trailing
//! 60-second window, calls in the trailing 1-second window, and the mean
//! inter-call interval over the most recent calls. Tripping any of them
//! blocks the endpoint for a fixed cooldown with an auto-clearing task.
//! Blocking is idempotent: re-detection while blocked does not extend the
//! cooldown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Thresholds and timing for the loop guard.
#[derive(Debug, Clone)]
pub struct LoopGuardConfig {
    /// Calls in the trailing 60s window above which the endpoint is looping.
    pub max_per_minute: u32,
    /// Calls in the trailing 1s window above which the endpoint is looping.
    pub max_per_second: usize,
    /// Mean inter-call interval below which the endpoint is looping.
    /// Only evaluated once enough calls have been recorded.
    pub min_mean_interval: Duration,
    /// How long a looping endpoint stays blocked.
    pub cooldown: Duration,
    /// Endpoints idle longer than this are purged by the periodic sweep.
    pub idle_ttl: Duration,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 20,
            max_per_second: 3,
            min_mean_interval: Duration::from_millis(1000),
            cooldown: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(600),
        }
    }
}

/// Number of recent call timestamps kept per endpoint.
const RECENT_CALLS: usize = 10;
/// Number of timestamps needed before the mean-interval signal applies.
const MEAN_SAMPLE: usize = 5;

#[derive(Debug)]
struct EndpointMetric {
    /// Lifetime call count.
    count: u64,
    last_request_at: Instant,
    /// Most recent call timestamps, newest last, capped at [`RECENT_CALLS`].
    recent: VecDeque<Instant>,
    /// Coarse counter for the trailing-minute window.
    minute_window_start: Instant,
    minute_count: u32,
    blocked_until: Option<Instant>,
}

impl EndpointMetric {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            last_request_at: now,
            recent: VecDeque::with_capacity(RECENT_CALLS),
            minute_window_start: now,
            minute_count: 0,
            blocked_until: None,
        }
    }
}

struct GuardInner {
    endpoints: DashMap<String, EndpointMetric>,
    unblockers: DashMap<String, AbortHandle>,
    config: LoopGuardConfig,
}

/// Per-endpoint request-storm breaker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LoopGuard {
    inner: Arc<GuardInner>,
}

impl LoopGuard {
    /// Create a guard with the given configuration.
    pub fn new(config: LoopGuardConfig) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                endpoints: DashMap::new(),
                unblockers: DashMap::new(),
                config,
            }),
        }
    }

    /// Record an intended call to `endpoint` and decide whether it may
    /// proceed. Returns `false` while the endpoint is blocked; no remote
    /// call has been attempted in that case.
    pub fn record_request(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        let config = &self.inner.config;
        let mut metric = self
            .inner
            .endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointMetric::new(now));

        if let Some(until) = metric.blocked_until {
            if now < until {
                debug!(
                    endpoint = %endpoint,
                    remaining_ms = (until - now).as_millis() as u64,
                    "Request refused, endpoint blocked"
                );
                return false;
            }
            // The unblock task may lag behind virtual time; an expired block
            // clears on the next call either way.
            metric.blocked_until = None;
        }

        metric.count += 1;
        metric.last_request_at = now;
        if metric.recent.len() == RECENT_CALLS {
            metric.recent.pop_front();
        }
        metric.recent.push_back(now);

        if now.duration_since(metric.minute_window_start) > Duration::from_secs(60) {
            metric.minute_window_start = now;
            metric.minute_count = 0;
        }
        metric.minute_count += 1;

        let burst = metric
            .recent
            .iter()
            .filter(|t| now.duration_since(**t) <= Duration::from_secs(1))
            .count();

        let mean_too_fast = if metric.recent.len() >= MEAN_SAMPLE {
            let window: Vec<Instant> = metric
                .recent
                .iter()
                .rev()
                .take(MEAN_SAMPLE)
                .copied()
                .collect();
            let span = window[0].duration_since(window[MEAN_SAMPLE - 1]);
            span / (MEAN_SAMPLE as u32 - 1) < config.min_mean_interval
        } else {
            false
        };

        let looping = metric.minute_count > config.max_per_minute
            || burst > config.max_per_second
            || mean_too_fast;

        if !looping {
            return true;
        }

        warn!(
            endpoint = %endpoint,
            calls_last_minute = metric.minute_count,
            calls_last_second = burst,
            "Request loop detected, blocking endpoint"
        );

        metric.blocked_until = Some(now + config.cooldown);
        drop(metric);
        self.schedule_unblock(endpoint);

        false
    }

    /// Remaining block time for an endpoint, if it is currently blocked.
    pub fn block_status(&self, endpoint: &str) -> Option<Duration> {
        let metric = self.inner.endpoints.get(endpoint)?;
        let until = metric.blocked_until?;
        let now = Instant::now();
        (now < until).then(|| until - now)
    }

    /// Clear all recorded state for an endpoint, including any block.
    pub fn reset(&self, endpoint: &str) {
        self.inner.endpoints.remove(endpoint);
        if let Some((_, handle)) = self.inner.unblockers.remove(endpoint) {
            handle.abort();
        }
    }

    /// Purge endpoints with no activity within the idle TTL. Returns the
    /// number of endpoints removed. Intended to run on a periodic sweep to
    /// bound memory.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let idle_ttl = self.inner.config.idle_ttl;
        let mut purged = Vec::new();

        self.inner.endpoints.retain(|name, metric| {
            let keep = now.duration_since(metric.last_request_at) < idle_ttl;
            if !keep {
                purged.push(name.clone());
            }
            keep
        });

        for name in &purged {
            if let Some((_, handle)) = self.inner.unblockers.remove(name) {
                handle.abort();
            }
        }

        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged idle endpoints from loop guard");
        }
        purged.len()
    }

    /// Cancel all pending unblock tasks and clear all state.
    pub fn shutdown(&self) {
        for entry in self.inner.unblockers.iter() {
            entry.value().abort();
        }
        self.inner.unblockers.clear();
        self.inner.endpoints.clear();
    }

    fn schedule_unblock(&self, endpoint: &str) {
        // One unblock task per endpoint; a still-running task means the
        // existing cooldown clock stands.
        if let Some(handle) = self.inner.unblockers.get(endpoint)
            && !handle.is_finished()
        {
            return;
        }

        let inner = self.inner.clone();
        let name = endpoint.to_string();
        let cooldown = self.inner.config.cooldown;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(mut metric) = inner.endpoints.get_mut(&name) {
                metric.blocked_until = None;
            }
            inner.unblockers.remove(&name);
            debug!(endpoint = %name, "Endpoint unblocked");
        });

        self.inner
            .unblockers
            .insert(endpoint.to_string(), handle.abort_handle());
    }
}
