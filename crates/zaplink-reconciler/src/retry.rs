// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy and cancellation primitives.
//!
//! Polling loops are expressed through an explicit [`RetryPolicy`] value
//! object and the generic [`retry_with_backoff`] driver instead of ad-hoc
//! sleep chains, so the backoff math is testable apart from the business
//! logic it wraps.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

/// Backoff schedule for a polling loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(2000),
            multiplier: 1.5,
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given 1-based attempt number:
    /// `min(base * multiplier^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.powi(exponent as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation signal for an in-flight polling loop.
///
/// Cheap to clone; all clones observe the same signal. Cancellation is
/// checked between backoff sleeps, not only at loop entry, so a caller that
/// abandons a poll stops it promptly.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Re-check after registering interest so a cancel() racing with this
        // call is not missed.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Drive `attempt_fn` under `policy` until it resolves, errors fatally, is
/// cancelled, or the attempt budget runs out.
///
/// `attempt_fn` receives the 1-based attempt number and returns:
/// - `Ok(Some(value))`: done, `value` is returned;
/// - `Ok(None)`: not resolved yet, back off and try again;
/// - `Err(e)`: fatal, the loop aborts immediately.
///
/// Returns `Ok(None)` when the budget is exhausted or the token is
/// cancelled mid-backoff.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut attempt_fn: F,
) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            debug!(attempt = attempt, "Retry loop cancelled before attempt");
            return Ok(None);
        }

        if let Some(value) = attempt_fn(attempt).await? {
            return Ok(Some(value));
        }

        if attempt < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(attempt = attempt, "Retry loop cancelled during backoff");
                    return Ok(None);
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4500));
        assert_eq!(policy.delay_for(4), Duration::from_millis(6750));
        // 2000 * 1.5^4 = 10125ms, capped.
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_on_third_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<Option<u32>, Infallible> =
            retry_with_backoff(&policy, &cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok((attempt == 3).then_some(attempt)) }
            })
            .await;

        assert_eq!(result.unwrap(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 4,
            ..RetryPolicy::default()
        };
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<Option<()>, Infallible> =
            retry_with_backoff(&policy, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;

        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts_immediately() {
        let policy = RetryPolicy::default();
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<Option<()>, &str> = retry_with_backoff(&policy, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("bad request") }
        })
        .await;

        assert_eq!(result.unwrap_err(), "bad request");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_mid_backoff() {
        let policy = RetryPolicy::default();
        let cancel = CancelToken::new();

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            retry_with_backoff::<(), Infallible, _, _>(&policy, &loop_cancel, |_| async {
                Ok(None)
            })
            .await
        });

        // Let the first attempt run, then cancel during its backoff sleep.
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_token_reports_immediately() {
        let cancel = CancelToken::new();
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        assert!(cancel.is_cancelled());
        // Must not hang.
        cancel.cancelled().await;
    }
}
