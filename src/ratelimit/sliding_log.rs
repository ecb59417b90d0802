//! Sliding window log implementation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::backend::{RateLimiter, Strategy};
use super::clock::{Clock, SystemClock};
use crate::error::{ensure_nonzero_duration, ensure_positive, Result};

/// A rate limiter that keeps the timestamp of every admitted request.
///
/// A request is admitted when fewer than `limit` requests were admitted in
/// the trailing `window`. Rejected requests are never logged, so the log
/// holds at most `limit` entries.
///
/// The log is kept in non-decreasing order: every appended timestamp is at
/// least the current tail. Expiry can therefore trim a prefix instead of
/// scanning the whole log.
pub struct SlidingWindowLogLimiter<C: Clock = SystemClock> {
    limit: u64,
    window: Duration,
    log: Mutex<VecDeque<Instant>>,
    clock: C,
}

impl SlidingWindowLogLimiter<SystemClock> {
    /// Create a new sliding window log limiter on the system clock.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Self::with_clock(limit, window, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLogLimiter<C> {
    /// Create a new sliding window log limiter on the given clock.
    pub fn with_clock(limit: u64, window: Duration, clock: C) -> Result<Self> {
        ensure_positive("limit", limit)?;
        ensure_nonzero_duration("window", window)?;

        let capacity = usize::try_from(limit).unwrap_or(usize::MAX).min(1024);
        Ok(Self {
            limit,
            window,
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            clock,
        })
    }

    /// Admit one request if fewer than `limit` were admitted in the last window.
    pub fn allow(&self) -> bool {
        let mut log = self.log.lock();
        let mut now = self.clock.now();

        // Keep appends in order even if the clock was read out of order
        // across threads.
        if let Some(&tail) = log.back() {
            now = now.max(tail);
        }

        if let Some(cutoff) = now.checked_sub(self.window) {
            while log.front().is_some_and(|&t| t <= cutoff) {
                log.pop_front();
            }
        }

        if (log.len() as u64) < self.limit {
            log.push_back(now);
            true
        } else {
            debug!(
                logged = log.len(),
                limit = self.limit,
                "Sliding window limit exceeded"
            );
            false
        }
    }

    /// Get the limit per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of timestamps currently in the log, including ones that have
    /// expired but not yet been trimmed by a call.
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLogLimiter<C> {
    fn allow(&self, _key: Option<&str>) -> bool {
        SlidingWindowLogLimiter::allow(self)
    }

    fn strategy(&self) -> Strategy {
        Strategy::SlidingWindowLog
    }
}
