//! Rate policy values.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Time unit a limit's rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub const fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// An immutable rate policy: `rate` events per `period`, with up to `burst`
/// events serviceable as an instantaneous spike.
///
/// The all-zero limit is the "no policy configured" sentinel, see
/// [`Limit::is_zero`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Limit {
    /// Events granted per period in steady state
    pub rate: u64,
    /// Maximum instantaneous spike
    pub burst: u64,
    /// Length of the period the rate applies to
    pub period: Duration,
}

impl Limit {
    /// Create a limit from its raw parts.
    pub const fn new(rate: u64, burst: u64, period: Duration) -> Self {
        Self {
            rate,
            burst,
            period,
        }
    }

    /// `rate` events per second, bursting up to `rate`.
    pub const fn per_second(rate: u64) -> Self {
        Self::per_unit(rate, TimeUnit::Second)
    }

    /// `rate` events per minute, bursting up to `rate`.
    pub const fn per_minute(rate: u64) -> Self {
        Self::per_unit(rate, TimeUnit::Minute)
    }

    /// `rate` events per hour, bursting up to `rate`.
    pub const fn per_hour(rate: u64) -> Self {
        Self::per_unit(rate, TimeUnit::Hour)
    }

    /// `rate` events per `unit`, bursting up to `rate`.
    pub const fn per_unit(rate: u64, unit: TimeUnit) -> Self {
        Self::new(rate, rate, unit.duration())
    }

    /// Same rate and period with a different burst.
    pub const fn with_burst(self, burst: u64) -> Self {
        Self { burst, ..self }
    }

    /// Whether this is the "no policy configured" sentinel.
    pub fn is_zero(&self) -> bool {
        self.rate == 0 && self.burst == 0 && self.period.is_zero()
    }

    /// Check that this limit can be used to gate traffic.
    pub fn validate(&self) -> Result<()> {
        if self.is_zero() {
            return Err(LimiterError::UnconfiguredLimit);
        }
        if self.rate == 0 {
            return Err(LimiterError::InvalidLimit(format!("{self}: rate must be > 0")));
        }
        if self.period.is_zero() {
            return Err(LimiterError::InvalidLimit(format!("{self}: period must be > 0")));
        }
        Ok(())
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} req/{}s (burst {})",
            self.rate,
            self.period.as_secs_f64(),
            self.burst
        )
    }
}
