//! Strategy selection from configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::backend::{RateLimiter, Strategy};
use super::fixed_window::FixedWindowLimiter;
use super::keyed::KeyedTokenBucketLimiter;
use super::sliding_log::SlidingWindowLogLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::error::{ensure_nonzero_duration, ensure_positive, Result};

/// Default admissions per window or bucket size.
const DEFAULT_LIMIT: u64 = 5;
/// Default window length for the window strategies.
const DEFAULT_WINDOW_MS: u64 = 1000;
/// Default tokens added per refill tick.
const DEFAULT_REFILL_RATE: u64 = 5;
/// Default refill tick period.
const DEFAULT_REFILL_INTERVAL_MS: u64 = 1000;
/// Default per-key refill rate.
const DEFAULT_RATE_PER_MINUTE: u64 = 120;

/// Policy parameters for one limiter, tagged by strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// See [`FixedWindowLimiter`]
    FixedWindow {
        /// Requests admitted per window
        limit: u64,
        /// Window length in milliseconds
        window_ms: u64,
    },
    /// See [`SlidingWindowLogLimiter`]
    SlidingWindowLog {
        /// Requests admitted per trailing window
        limit: u64,
        /// Window length in milliseconds
        window_ms: u64,
    },
    /// See [`TokenBucketLimiter`]
    TokenBucket {
        /// Maximum tokens held
        capacity: u64,
        /// Tokens added per tick
        refill_rate: u64,
        /// Tick period in milliseconds
        refill_interval_ms: u64,
    },
    /// See [`KeyedTokenBucketLimiter`]
    KeyedTokenBucket {
        /// Per-key burst size
        capacity: u64,
        /// Per-key tokens per minute
        rate_per_minute: u64,
    },
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::defaults_for(Strategy::FixedWindow)
    }
}

impl LimiterConfig {
    /// Default parameters for the given strategy.
    pub fn defaults_for(strategy: Strategy) -> Self {
        match strategy {
            Strategy::FixedWindow => LimiterConfig::FixedWindow {
                limit: DEFAULT_LIMIT,
                window_ms: DEFAULT_WINDOW_MS,
            },
            Strategy::SlidingWindowLog => LimiterConfig::SlidingWindowLog {
                limit: DEFAULT_LIMIT,
                window_ms: DEFAULT_WINDOW_MS,
            },
            Strategy::TokenBucket => LimiterConfig::TokenBucket {
                capacity: DEFAULT_LIMIT,
                refill_rate: DEFAULT_REFILL_RATE,
                refill_interval_ms: DEFAULT_REFILL_INTERVAL_MS,
            },
            Strategy::KeyedTokenBucket => LimiterConfig::KeyedTokenBucket {
                capacity: DEFAULT_LIMIT,
                rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            },
        }
    }

    /// The strategy this configuration selects.
    pub fn strategy(&self) -> Strategy {
        match self {
            LimiterConfig::FixedWindow { .. } => Strategy::FixedWindow,
            LimiterConfig::SlidingWindowLog { .. } => Strategy::SlidingWindowLog,
            LimiterConfig::TokenBucket { .. } => Strategy::TokenBucket,
            LimiterConfig::KeyedTokenBucket { .. } => Strategy::KeyedTokenBucket,
        }
    }

    /// Run the construction-time checks without building a limiter.
    pub fn validate(&self) -> Result<()> {
        match *self {
            LimiterConfig::FixedWindow { limit, window_ms }
            | LimiterConfig::SlidingWindowLog { limit, window_ms } => {
                ensure_positive("limit", limit)?;
                ensure_nonzero_duration("window", Duration::from_millis(window_ms))
            }
            LimiterConfig::TokenBucket {
                capacity,
                refill_rate,
                refill_interval_ms,
            } => {
                ensure_positive("capacity", capacity)?;
                ensure_positive("refill_rate", refill_rate)?;
                ensure_nonzero_duration(
                    "refill_interval",
                    Duration::from_millis(refill_interval_ms),
                )
            }
            LimiterConfig::KeyedTokenBucket {
                capacity,
                rate_per_minute,
            } => {
                ensure_positive("capacity", capacity)?;
                ensure_positive("rate_per_minute", rate_per_minute)
            }
        }
    }
}

/// Build the limiter selected by `config` on the system clock.
///
/// A token bucket spawns its refill task on the current tokio runtime, so
/// this must be called from within one for that strategy.
pub fn build_limiter(config: &LimiterConfig) -> Result<Arc<dyn RateLimiter>> {
    let limiter: Arc<dyn RateLimiter> = match *config {
        LimiterConfig::FixedWindow { limit, window_ms } => Arc::new(FixedWindowLimiter::new(
            limit,
            Duration::from_millis(window_ms),
        )?),
        LimiterConfig::SlidingWindowLog { limit, window_ms } => Arc::new(
            SlidingWindowLogLimiter::new(limit, Duration::from_millis(window_ms))?,
        ),
        LimiterConfig::TokenBucket {
            capacity,
            refill_rate,
            refill_interval_ms,
        } => Arc::new(TokenBucketLimiter::new(
            capacity,
            refill_rate,
            Duration::from_millis(refill_interval_ms),
        )?),
        LimiterConfig::KeyedTokenBucket {
            capacity,
            rate_per_minute,
        } => Arc::new(KeyedTokenBucketLimiter::new(capacity, rate_per_minute)?),
    };

    info!(strategy = %limiter.strategy(), config = ?config, "Rate limiter initialized");
    Ok(limiter)
}
