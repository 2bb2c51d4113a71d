//! Named rate limit policies loaded from configuration.
//!
//! Lets callers refer to a limit by name (`orders`, `market_data`) instead of
//! repeating rate/burst/period triples at every call site.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::limit::{Limit, TimeUnit};
use crate::error::{LimiterError, Result};

/// A set of named limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    /// Map of policy name to rule
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyRule>,
}

/// A limit as written in configuration.
///
/// Either `unit` or `period_secs` sets the period; `unit` wins when both are
/// present. `burst` defaults to `rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Number of events allowed per period
    pub rate: u64,
    /// Instantaneous spike allowance
    #[serde(default)]
    pub burst: Option<u64>,
    /// Period as a named unit
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Period in seconds
    #[serde(default)]
    pub period_secs: Option<f64>,
}

impl PolicyRule {
    /// Convert to a [`Limit`], checking that it can gate traffic.
    pub fn to_limit(&self) -> Result<Limit> {
        let period = match (self.unit, self.period_secs) {
            (Some(unit), _) => unit.duration(),
            (None, Some(secs)) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            (None, Some(secs)) => {
                return Err(LimiterError::Config(format!("invalid period_secs {secs}")))
            }
            (None, None) => {
                return Err(LimiterError::Config(
                    "policy needs either `unit` or `period_secs`".to_string(),
                ))
            }
        };

        let limit = Limit::new(self.rate, self.burst.unwrap_or(self.rate), period);
        limit.validate()?;
        Ok(limit)
    }
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: PolicySet = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse policies: {}", e)))?;

        for (name, rule) in &set.policies {
            rule.to_limit()
                .map_err(|e| LimiterError::Config(format!("policy {name:?}: {e}")))?;
        }
        Ok(set)
    }

    /// Look up the limit for a named policy.
    pub fn limit(&self, name: &str) -> Result<Limit> {
        self.policies
            .get(name)
            .ok_or_else(|| LimiterError::Config(format!("unknown policy {name:?}")))?
            .to_limit()
    }

    /// Iterate over policy names and their limits.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Result<Limit>)> {
        self.policies
            .iter()
            .map(|(name, rule)| (name.as_str(), rule.to_limit()))
    }
}
