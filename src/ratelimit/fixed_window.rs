//! Fixed window counter implementation.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::{RateLimiter, Strategy};
use super::clock::{Clock, SystemClock};
use crate::error::{ensure_nonzero_duration, ensure_positive, GatekeeperError, Result};

/// Mutable state of one fixed window, guarded as a unit.
struct WindowState {
    /// Requests admitted in the current window
    count: u64,
    /// When the current window ends; `None` if that instant is beyond what
    /// the clock can represent, so the window never ends
    reset_at: Option<Instant>,
}

/// A rate limiter that counts requests in fixed-size windows.
///
/// The first window starts at construction. A call arriving after the
/// current window has ended opens a new window starting at that call, with
/// nothing carried over from the previous one.
///
/// Because windows reset wholesale, up to `2 * limit` requests can be
/// admitted in a span shorter than one window when they cluster around a
/// boundary. That is the documented behavior of this strategy; use
/// [`SlidingWindowLogLimiter`](super::SlidingWindowLogLimiter) for exact
/// accounting.
pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    /// The limit for each window
    limit: u64,
    /// Length of each window
    window: Duration,
    state: Mutex<WindowState>,
    clock: C,
}

impl FixedWindowLimiter<SystemClock> {
    /// Create a new fixed window limiter on the system clock.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Self::with_clock(limit, window, SystemClock)
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Create a new fixed window limiter on the given clock.
    pub fn with_clock(limit: u64, window: Duration, clock: C) -> Result<Self> {
        ensure_positive("limit", limit)?;
        ensure_nonzero_duration("window", window)?;

        let reset_at = clock.now().checked_add(window).ok_or_else(|| {
            GatekeeperError::InvalidConfiguration(format!(
                "window {:?} is too long to represent",
                window
            ))
        })?;
        Ok(Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                count: 0,
                reset_at: Some(reset_at),
            }),
            clock,
        })
    }

    /// Admit one request if the current window still has room.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();

        if state.reset_at.is_some_and(|reset_at| now > reset_at) {
            state.count = 0;
            state.reset_at = now.checked_add(self.window);
            trace!(limit = self.limit, "Fixed window reset");
        }

        if state.count < self.limit {
            state.count += 1;
            true
        } else {
            debug!(
                count = state.count,
                limit = self.limit,
                "Fixed window limit exceeded"
            );
            false
        }
    }

    /// Get the limit for each window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted so far in the current window.
    ///
    /// Reports the stored count; a window that has ended but not yet been
    /// reset by a call still shows its final count.
    pub fn current_count(&self) -> u64 {
        self.state.lock().count
    }
}

impl<C: Clock> RateLimiter for FixedWindowLimiter<C> {
    fn allow(&self, _key: Option<&str>) -> bool {
        FixedWindowLimiter::allow(self)
    }

    fn strategy(&self) -> Strategy {
        Strategy::FixedWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter(limit: u64, window: Duration) -> (FixedWindowLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = FixedWindowLimiter::with_clock(limit, window, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_allows_up_to_limit() {
        let (limiter, _clock) = limiter(5, Duration::from_secs(1));

        for _ in 0..5 {
            assert!(limiter.allow());
        }

        // The 6th request should be rejected
        assert!(!limiter.allow());
        assert_eq!(limiter.current_count(), 5);
    }

    #[test]
    fn test_window_reset_after_expiry() {
        let (limiter, clock) = limiter(2, Duration::from_secs(1));

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        clock.advance(Duration::from_millis(1001));
        assert!(limiter.allow());
        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_no_reset_exactly_at_boundary() {
        let (limiter, clock) = limiter(1, Duration::from_secs(1));

        assert!(limiter.allow());
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.allow(), "window ends strictly after reset time");
    }

    #[test]
    fn test_boundary_burst_admits_twice_the_limit() {
        let (limiter, clock) = limiter(5, Duration::from_secs(1));

        clock.set(Duration::from_millis(990));
        for i in 0..5 {
            assert!(limiter.allow(), "request {} before boundary should pass", i);
        }

        clock.set(Duration::from_millis(1010));
        for i in 0..5 {
            assert!(limiter.allow(), "request {} after boundary should pass", i);
        }

        // 10 admitted within ~20ms; the new window is now full
        assert!(!limiter.allow());
    }

    #[test]
    fn test_new_window_starts_at_triggering_call() {
        let (limiter, clock) = limiter(1, Duration::from_secs(1));

        assert!(limiter.allow());
        // Idle for several windows; the next window runs 1s from this call.
        clock.set(Duration::from_millis(3500));
        assert!(limiter.allow());
        clock.set(Duration::from_millis(4400));
        assert!(!limiter.allow());
        clock.set(Duration::from_millis(4501));
        assert!(limiter.allow());
    }

    #[test]
    fn test_rejects_zero_limit() {
        let result = FixedWindowLimiter::new(0, Duration::from_secs(1));
        assert!(matches!(result, Err(GatekeeperError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = FixedWindowLimiter::new(5, Duration::ZERO);
        assert!(matches!(result, Err(GatekeeperError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_unrepresentable_window() {
        let result = FixedWindowLimiter::new(5, Duration::MAX);
        assert!(matches!(result, Err(GatekeeperError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_trait_object_ignores_key() {
        let (limiter, _clock) = limiter(1, Duration::from_secs(1));
        let limiter: &dyn RateLimiter = &limiter;

        assert_eq!(limiter.strategy(), Strategy::FixedWindow);
        assert!(limiter.allow(Some("a")));
        assert!(!limiter.allow(Some("b")));
    }
}
