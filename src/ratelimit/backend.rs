//! Rate limiter trait for abstracting over admission strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The algorithm backing a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Counter reset at fixed window boundaries
    FixedWindow,
    /// Exact log of admitted timestamps over a moving window
    SlidingWindowLog,
    /// One shared bucket refilled by a background task
    TokenBucket,
    /// One bucket per caller key, refilled lazily
    KeyedTokenBucket,
}

impl Strategy {
    /// The snake_case name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FixedWindow => "fixed_window",
            Strategy::SlidingWindowLog => "sliding_window_log",
            Strategy::TokenBucket => "token_bucket",
            Strategy::KeyedTokenBucket => "keyed_token_bucket",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Strategy::FixedWindow),
            "sliding_window_log" => Ok(Strategy::SlidingWindowLog),
            "token_bucket" => Ok(Strategy::TokenBucket),
            "keyed_token_bucket" => Ok(Strategy::KeyedTokenBucket),
            other => Err(format!(
                "unknown strategy '{}' (expected fixed_window, sliding_window_log, token_bucket or keyed_token_bucket)",
                other
            )),
        }
    }
}

/// Trait for rate limiter implementations.
///
/// Callers depend on this trait only. `allow` never blocks: it returns
/// immediately with the admission decision and mutates the limiter's own
/// state under its own lock.
pub trait RateLimiter: Send + Sync {
    /// Decide whether one unit of work identified by `key` may proceed.
    ///
    /// Strategies that are not keyed ignore `key`.
    fn allow(&self, key: Option<&str>) -> bool;

    /// Which algorithm backs this limiter.
    fn strategy(&self) -> Strategy;

    /// Release background resources. Safe to call more than once.
    fn shutdown(&self) {}
}
