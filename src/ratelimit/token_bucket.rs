//! Shared token bucket refilled by a background task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::backend::{RateLimiter, Strategy};
use crate::error::{ensure_nonzero_duration, ensure_positive, GatekeeperError, Result};

/// State shared between the limiter and its refill task.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, always within `0..=capacity`
    tokens: Mutex<u64>,
    capacity: u64,
    refill_rate: u64,
    /// Cancelled exactly once, by `stop` or by drop
    shutdown: CancellationToken,
}

impl BucketState {
    /// Add up to `refill_rate` tokens, discarding overflow beyond capacity.
    fn refill(&self) {
        let mut tokens = self.tokens.lock();
        // Checked under the lock so nothing lands after `stop` returns.
        if self.shutdown.is_cancelled() {
            return;
        }
        let before = *tokens;
        *tokens = before.saturating_add(self.refill_rate).min(self.capacity);
        trace!(before, after = *tokens, "Token bucket refilled");
    }
}

/// A single token bucket shared by every caller.
///
/// The bucket starts full. A tokio task adds `refill_rate` tokens every
/// `refill_interval`, saturating at `capacity`; ticks that land on a full
/// bucket are no-ops. [`allow`](Self::allow) takes one token without waiting.
///
/// The refill task lives until [`stop`](Self::stop) is called or the limiter
/// is dropped. After stopping, `allow` keeps handing out whatever tokens were
/// left and then rejects every call.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    inner: Arc<BucketState>,
    refill_interval: Duration,
    task: JoinHandle<()>,
}

impl TokenBucketLimiter {
    /// Create a full bucket and start its refill task on the current tokio
    /// runtime.
    ///
    /// * `capacity`        - maximum tokens held
    /// * `refill_rate`     - tokens added per tick
    /// * `refill_interval` - tick period
    pub fn new(capacity: u64, refill_rate: u64, refill_interval: Duration) -> Result<Self> {
        ensure_positive("capacity", capacity)?;
        ensure_positive("refill_rate", refill_rate)?;
        ensure_nonzero_duration("refill_interval", refill_interval)?;

        let first_tick = Instant::now().checked_add(refill_interval).ok_or_else(|| {
            GatekeeperError::InvalidConfiguration(format!(
                "refill_interval {:?} is too long to represent",
                refill_interval
            ))
        })?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            GatekeeperError::Runtime(format!("token bucket needs a tokio runtime: {e}"))
        })?;

        let inner = Arc::new(BucketState {
            tokens: Mutex::new(capacity),
            capacity,
            refill_rate,
            shutdown: CancellationToken::new(),
        });

        let task = runtime.spawn(run_refill(Arc::clone(&inner), first_tick, refill_interval));

        info!(
            capacity,
            refill_rate,
            refill_interval = ?refill_interval,
            "Token bucket refill task started"
        );

        Ok(Self {
            inner,
            refill_interval,
            task,
        })
    }

    /// Take one token if any is available.
    pub fn allow(&self) -> bool {
        let mut tokens = self.inner.tokens.lock();
        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            debug!(capacity = self.inner.capacity, "Token bucket empty");
            false
        }
    }

    /// Stop the refill task.
    ///
    /// The first call cancels the task; later calls do nothing. No refill is
    /// applied after this returns. The task itself exits at its next wake-up.
    pub fn stop(&self) {
        let _tokens = self.inner.tokens.lock();
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        info!(capacity = self.inner.capacity, "Token bucket refill task stopped");
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Whether the refill task is still running.
    pub fn is_refill_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Tokens currently available.
    pub fn available(&self) -> u64 {
        *self.inner.tokens.lock()
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// Get the number of tokens added per tick.
    pub fn refill_rate(&self) -> u64 {
        self.inner.refill_rate
    }

    /// Get the tick period.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, _key: Option<&str>) -> bool {
        TokenBucketLimiter::allow(self)
    }

    fn strategy(&self) -> Strategy {
        Strategy::TokenBucket
    }

    fn shutdown(&self) {
        self.stop();
    }
}

/// Refill loop: wait for either the next tick or cancellation.
async fn run_refill(state: Arc<BucketState>, first_tick: Instant, period: Duration) {
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => {
                debug!("Token bucket refill task exiting");
                break;
            }
            _ = interval.tick() => {
                state.refill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    /// Let the refill task observe whatever just happened.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_full_and_rejects_when_empty() {
        let limiter = assert_ok!(TokenBucketLimiter::new(5, 5, Duration::from_secs(1)));

        for i in 0..5 {
            assert!(limiter.allow(), "request {} should be admitted", i);
        }
        assert!(!limiter.allow(), "6th request should be rejected");

        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_after_one_interval() {
        let limiter = TokenBucketLimiter::new(5, 5, Duration::from_secs(1)).unwrap();

        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());

        tokio::time::sleep(Duration::from_millis(1010)).await;

        for i in 0..5 {
            assert!(limiter.allow(), "refilled request {} should be admitted", i);
        }
        assert!(!limiter.allow());

        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_partial_per_tick() {
        let limiter = TokenBucketLimiter::new(10, 3, Duration::from_millis(100)).unwrap();

        for _ in 0..10 {
            assert!(limiter.allow());
        }
        assert_eq!(limiter.available(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.available(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.available(), 6);

        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_never_overfill() {
        let limiter = TokenBucketLimiter::new(3, 2, Duration::from_millis(100)).unwrap();

        assert!(limiter.allow());
        assert_eq!(limiter.available(), 2);

        // Ten ticks without consumption.
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(limiter.available(), 3);

        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_refill() {
        let limiter = TokenBucketLimiter::new(2, 2, Duration::from_millis(100)).unwrap();

        assert!(limiter.allow());
        assert!(limiter.allow());

        limiter.stop();
        limiter.stop();
        assert!(limiter.is_stopped());

        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        assert_eq!(limiter.available(), 0, "no refill after stop");
        assert!(!limiter.allow());
        assert!(!limiter.is_refill_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_after_stop_drains_remaining_tokens() {
        let limiter = TokenBucketLimiter::new(2, 1, Duration::from_secs(1)).unwrap();
        limiter.stop();

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_refill_task() {
        let limiter = TokenBucketLimiter::new(2, 1, Duration::from_millis(10)).unwrap();
        let state = Arc::clone(&limiter.inner);

        drop(limiter);
        assert!(state.shutdown.is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        // Only our handle remains once the task has exited.
        assert_eq!(Arc::strong_count(&state), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_through_trait() {
        let limiter = TokenBucketLimiter::new(1, 1, Duration::from_secs(1)).unwrap();
        let dyn_limiter: &dyn RateLimiter = &limiter;

        assert_eq!(dyn_limiter.strategy(), Strategy::TokenBucket);
        dyn_limiter.shutdown();
        dyn_limiter.shutdown();
        assert!(limiter.is_stopped());
    }

    #[tokio::test]
    async fn test_rejects_unrepresentable_interval() {
        let result = TokenBucketLimiter::new(5, 5, Duration::MAX);
        assert!(matches!(result, Err(GatekeeperError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_requires_runtime() {
        let result = TokenBucketLimiter::new(5, 5, Duration::from_secs(1));
        assert!(matches!(result, Err(GatekeeperError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_rejects_invalid_configuration() {
        assert_err!(TokenBucketLimiter::new(0, 5, Duration::from_secs(1)));
        assert_err!(TokenBucketLimiter::new(5, 0, Duration::from_secs(1)));
        assert!(matches!(
            TokenBucketLimiter::new(5, 5, Duration::ZERO),
            Err(GatekeeperError::InvalidConfiguration(_))
        ));
    }
}
