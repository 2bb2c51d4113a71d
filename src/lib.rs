//! Tatlimit - Distributed GCRA Rate Limiting
//!
//! This crate decides, for an identified subject, how many of N requested
//! events may proceed right now under a rate/burst policy, while any number
//! of processes race for the same quota. The Generic Cell Rate Algorithm runs
//! atomically inside a shared store (Redis), so callers need no locking of
//! their own and all of them observe a single clock.
//!
//! ```rust,no_run
//! use tatlimit::config::{LimiterConfig, StoreConfig};
//! use tatlimit::ratelimit::{Limit, RateLimiter};
//!
//! # async fn run() -> tatlimit::error::Result<()> {
//! let limiter = RateLimiter::from_config(&StoreConfig::default(), &LimiterConfig::default()).await?;
//! let decision = limiter.allow("orders:BTCUSDT", &Limit::per_second(10)).await?;
//! if !decision.is_allowed() {
//!     println!("retry in {:?}", decision.retry_after_duration());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod telemetry;
