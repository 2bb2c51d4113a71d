//! Decision values returned to callers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::store::RawReply;
use crate::error::{LimiterError, Result};

/// Sentinel `retry_after` meaning "capacity is available now".
pub const RETRY_IMMEDIATELY: f64 = -1.0;

/// The outcome of one rate limit evaluation for one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Number of events granted by this call
    pub allowed: u64,
    /// Capacity left for the key immediately after the call
    pub remaining: u64,
    /// Seconds until one more event could be granted, or
    /// [`RETRY_IMMEDIATELY`] when no wait is needed
    pub retry_after: f64,
    /// Seconds until the key is fully replenished if left idle
    pub reset_after: f64,
}

impl Decision {
    /// The decision for a request of zero events: trivially granted, nothing consumed.
    pub(crate) fn empty() -> Self {
        Self {
            allowed: 0,
            remaining: 0,
            retry_after: RETRY_IMMEDIATELY,
            reset_after: 0.0,
        }
    }

    /// Parse the 4-tuple returned by the store.
    pub fn from_reply(reply: RawReply) -> Result<Self> {
        let allowed = u64::try_from(reply.allowed).map_err(|_| {
            LimiterError::MalformedReply(format!("negative allowed count {}", reply.allowed))
        })?;
        let remaining = u64::try_from(reply.remaining).map_err(|_| {
            LimiterError::MalformedReply(format!("negative remaining count {}", reply.remaining))
        })?;

        Ok(Self {
            allowed,
            remaining,
            retry_after: parse_seconds("retry_after", &reply.retry_after)?,
            reset_after: parse_seconds("reset_after", &reply.reset_after)?,
        })
    }

    /// Whether at least one event was granted.
    pub fn is_allowed(&self) -> bool {
        self.allowed > 0
    }

    /// Time to wait before retrying, `None` when capacity is available now.
    pub fn retry_after_duration(&self) -> Option<Duration> {
        if self.retry_after < 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(self.retry_after))
        }
    }

    /// Time until the key returns to its fully replenished state.
    pub fn reset_after_duration(&self) -> Duration {
        Duration::from_secs_f64(self.reset_after.max(0.0))
    }
}

fn parse_seconds(field: &str, text: &str) -> Result<f64> {
    let value: f64 = text.trim().parse().map_err(|_| {
        LimiterError::MalformedReply(format!("{field} is not a number: {text:?}"))
    })?;
    if !value.is_finite() {
        return Err(LimiterError::MalformedReply(format!(
            "{field} is not finite: {text:?}"
        )));
    }
    Ok(value)
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Decision(allowed={}, remaining={}, retry_after={}, reset_after={})",
            self.allowed, self.remaining, self.retry_after, self.reset_after
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(allowed: i64, remaining: i64, retry: &str, reset: &str) -> RawReply {
        RawReply {
            allowed,
            remaining,
            retry_after: retry.to_string(),
            reset_after: reset.to_string(),
        }
    }

    #[test]
    fn test_parse_grant() {
        let decision = Decision::from_reply(reply(1, 9, "-1", "6")).unwrap();
        assert_eq!(decision.allowed, 1);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.retry_after, RETRY_IMMEDIATELY);
        assert_eq!(decision.reset_after, 6.0);
        assert!(decision.is_allowed());
        assert_eq!(decision.retry_after_duration(), None);
        assert_eq!(decision.reset_after_duration(), Duration::from_secs(6));
    }

    #[test]
    fn test_parse_denial() {
        let decision = Decision::from_reply(reply(0, 0, "17.5", "47.999")).unwrap();
        assert!(!decision.is_allowed());
        assert_eq!(
            decision.retry_after_duration(),
            Some(Duration::from_secs_f64(17.5))
        );
    }

    #[test]
    fn test_malformed_reply() {
        assert!(matches!(
            Decision::from_reply(reply(1, 0, "soon", "1")),
            Err(LimiterError::MalformedReply(_))
        ));
        assert!(matches!(
            Decision::from_reply(reply(-1, 0, "-1", "1")),
            Err(LimiterError::MalformedReply(_))
        ));
        assert!(matches!(
            Decision::from_reply(reply(1, 0, "-1", "nan")),
            Err(LimiterError::MalformedReply(_))
        ));
    }

    #[test]
    fn test_display() {
        let decision = Decision::from_reply(reply(2, 0, "-1", "12")).unwrap();
        assert_eq!(
            decision.to_string(),
            "Decision(allowed=2, remaining=0, retry_after=-1, reset_after=12)"
        );
    }
}
