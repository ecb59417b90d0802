//! Gatekeeper - Process-local Admission Control
//!
//! This crate implements a family of rate limiters that decide, under
//! concurrent access, whether a caller may proceed right now. Every strategy
//! sits behind the [`ratelimit::RateLimiter`] trait so collaborators (HTTP
//! handlers, CLI loops) never depend on a concrete algorithm.

pub mod config;
pub mod error;
pub mod ratelimit;
