//! Store adapter trait for abstracting in-process and shared backends.

use std::fmt;

use async_trait::async_trait;

use super::limit::Limit;
use crate::error::Result;

/// Which GCRA variant the store should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// All-or-nothing admission of exactly `count` events
    AllowN,
    /// Partial admission of up to `count` events
    AllowAtMost,
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::AllowN => f.write_str("allow_n"),
            Script::AllowAtMost => f.write_str("allow_at_most"),
        }
    }
}

/// Arguments passed to a GCRA script, in wire order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptArgs {
    pub burst: u64,
    pub rate: u64,
    pub period_secs: f64,
    pub count: u64,
}

impl ScriptArgs {
    pub fn new(limit: &Limit, count: u64) -> Self {
        Self {
            burst: limit.burst,
            rate: limit.rate,
            period_secs: limit.period.as_secs_f64(),
            count,
        }
    }

    /// Steady-state cost of one event, in seconds.
    pub fn emission_interval(&self) -> f64 {
        self.period_secs / self.rate as f64
    }

    /// Seconds of credit a fully idle key holds.
    pub fn burst_offset(&self) -> f64 {
        self.emission_interval() * self.burst as f64
    }
}

/// The raw 4-tuple a store answers with: integer counts and text-encoded
/// second values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub allowed: i64,
    pub remaining: i64,
    pub retry_after: String,
    pub reset_after: String,
}

/// A shared key-value store able to run the GCRA procedure atomically
/// against one key.
///
/// Implementations must read the clock on the store side and must make the
/// read-modify-write of a key's TAT indivisible with respect to every other
/// evaluation against the same key.
#[async_trait]
pub trait GcraStore: Send + Sync {
    /// Atomically evaluate `script` against `key`.
    async fn evaluate(&self, script: Script, key: &str, args: ScriptArgs) -> Result<RawReply>;

    /// Delete `key`, reporting whether exactly one key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
}
