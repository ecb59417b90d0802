//! Per-key token buckets with lazy refill.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{RateLimiter, Strategy};
use super::clock::{Clock, SystemClock};
use crate::error::{ensure_positive, Result};

/// Bucket used when a caller supplies no key through the trait.
const ANONYMOUS_KEY: &str = "";

/// Internal state for a single key's bucket.
#[derive(Debug, Clone, Copy)]
struct KeyBucket {
    tokens: u64,
    last_refill: Instant,
}

/// A rate limiter with an independent token bucket per caller key.
///
/// Buckets are created full on the first call for a key and refill lazily on
/// access at `rate_per_minute / 60` tokens per second. Only whole tokens are
/// credited; the fractional remainder carries over to the next call.
///
/// Each key's read-refill-take sequence runs under that key's map entry
/// lock. Unrelated keys usually live in different shards and do not contend.
///
/// Keys are kept for the life of the limiter. Services facing an unbounded
/// key space should call [`evict_idle`](Self::evict_idle) periodically.
pub struct KeyedTokenBucketLimiter<C: Clock = SystemClock> {
    buckets: DashMap<String, KeyBucket>,
    capacity: u64,
    rate_per_second: f64,
    clock: C,
}

impl KeyedTokenBucketLimiter<SystemClock> {
    /// Create a new keyed limiter on the system clock.
    ///
    /// * `capacity`        - per-key burst size
    /// * `rate_per_minute` - sustained tokens per minute for each key
    pub fn new(capacity: u64, rate_per_minute: u64) -> Result<Self> {
        Self::with_clock(capacity, rate_per_minute, SystemClock)
    }
}

impl<C: Clock> KeyedTokenBucketLimiter<C> {
    /// Create a new keyed limiter on the given clock.
    pub fn with_clock(capacity: u64, rate_per_minute: u64, clock: C) -> Result<Self> {
        ensure_positive("capacity", capacity)?;
        ensure_positive("rate_per_minute", rate_per_minute)?;

        Ok(Self {
            buckets: DashMap::new(),
            capacity,
            rate_per_second: rate_per_minute as f64 / 60.0,
            clock,
        })
    }

    /// Admit one request for `key` if its bucket holds a token.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();

        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return self.take(key, bucket.value_mut(), now);
        }

        match self.buckets.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => self.take(key, entry.get_mut(), now),
            Entry::Vacant(entry) => {
                entry.insert(KeyBucket {
                    tokens: self.capacity - 1,
                    last_refill: now,
                });
                debug!(key, capacity = self.capacity, "Created token bucket for new key");
                true
            }
        }
    }

    /// Refill `bucket` up to `now`, then try to take one token.
    fn take(&self, key: &str, bucket: &mut KeyBucket, now: Instant) -> bool {
        self.refill(bucket, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            trace!(key, "Keyed token bucket empty");
            false
        }
    }

    fn refill(&self, bucket: &mut KeyBucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let accrued = elapsed.as_secs_f64() * self.rate_per_second;
        if accrued < 1.0 {
            return;
        }

        let whole = accrued.floor();
        let room = self.capacity - bucket.tokens;
        if whole >= room as f64 {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
        } else {
            bucket.tokens += whole as u64;
            // Advance only by the time the credited tokens account for.
            bucket.last_refill = credited_time(whole, self.rate_per_second)
                .and_then(|credited| bucket.last_refill.checked_add(credited))
                .map_or(now, |advanced| advanced.min(now));
        }
    }

    /// Remove buckets idle for at least `max_idle` that would be full by now.
    ///
    /// A removed key comes back as a fresh full bucket on its next call, so
    /// evicting a full bucket is invisible to callers. Returns the number of
    /// keys removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.buckets.retain(|_key, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill);
            let projected = bucket.tokens as f64 + idle.as_secs_f64() * self.rate_per_second;
            let stale = idle >= max_idle && projected >= self.capacity as f64;
            if stale {
                evicted += 1;
            }
            !stale
        });

        debug!(
            evicted,
            remaining = self.buckets.len(),
            "Keyed token bucket idle sweep complete"
        );
        evicted
    }

    /// Tokens stored for `key` as of its last access, if the key is known.
    pub fn tokens(&self, key: &str) -> Option<u64> {
        self.buckets.get(key).map(|bucket| bucket.tokens)
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    /// Get the per-key burst size.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }
}

/// Time it takes to accrue `tokens` at `rate_per_second`, or `None` if that
/// is not a representable duration.
fn credited_time(tokens: f64, rate_per_second: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(tokens / rate_per_second).ok()
}

impl<C: Clock> RateLimiter for KeyedTokenBucketLimiter<C> {
    fn allow(&self, key: Option<&str>) -> bool {
        KeyedTokenBucketLimiter::allow(self, key.unwrap_or(ANONYMOUS_KEY))
    }

    fn strategy(&self) -> Strategy {
        Strategy::KeyedTokenBucket
    }
}
