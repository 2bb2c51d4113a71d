//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace};

use super::decision::Decision;
use super::limit::Limit;
use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use super::store::{GcraStore, Script, ScriptArgs};
use crate::config::{LimiterConfig, StoreConfig, StoreKind};
use crate::error::{LimiterError, Result};

/// Default namespace for keys in a shared store.
pub const DEFAULT_KEY_PREFIX: &str = "rate:";

/// Largest count the store's double-precision arithmetic represents exactly.
pub const MAX_REQUESTED: u64 = 1 << 53;

/// The rate limiter facade.
///
/// Holds no locks and no per-key state: every decision is one atomic
/// evaluation inside the store, so any number of limiters, in this process
/// or others, may share a store and key prefix. Cloning is cheap and clones
/// share the store connection.
#[derive(Clone)]
pub struct RateLimiter {
    /// Store the decision procedure runs in
    store: Arc<dyn GcraStore>,
    /// Namespace prepended to every caller key
    prefix: String,
    /// Optional bound on each store round trip
    timeout: Option<Duration>,
}

impl RateLimiter {
    /// Create a limiter over `store` with the default key prefix and no timeout.
    pub fn new(store: Arc<dyn GcraStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: None,
        }
    }

    /// Create a limiter backed by a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Build the store described by `store` and wrap it per `limiter`.
    pub async fn from_config(store: &StoreConfig, limiter: &LimiterConfig) -> Result<Self> {
        let backend: Arc<dyn GcraStore> = match store.kind {
            StoreKind::Redis => Arc::new(RedisStore::connect(&store.redis_url).await?),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };

        let mut rate_limiter = Self::new(backend).with_prefix(&limiter.key_prefix);
        if let Some(ms) = limiter.timeout_ms {
            rate_limiter = rate_limiter.with_timeout(Duration::from_millis(ms));
        }
        Ok(rate_limiter)
    }

    /// Use a different key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Fail store calls that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The key namespace in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Shortcut for `allow_n(key, limit, 1)`.
    pub async fn allow(&self, key: &str, limit: &Limit) -> Result<Decision> {
        self.allow_n(key, limit, 1).await
    }

    /// Report whether exactly `n` events may happen now.
    ///
    /// The request is granted in full or refused in full; a refusal reports
    /// `remaining = 0` even if fewer than `n` units are free.
    pub async fn allow_n(&self, key: &str, limit: &Limit, n: u64) -> Result<Decision> {
        self.run(Script::AllowN, key, limit, n).await
    }

    /// Report how many of up to `n` events may happen now.
    ///
    /// Grants whatever is available, between zero and `n`.
    pub async fn allow_at_most(&self, key: &str, limit: &Limit, n: u64) -> Result<Decision> {
        self.run(Script::AllowAtMost, key, limit, n).await
    }

    /// Forget the state of `key`, restoring its full burst capacity.
    ///
    /// Returns whether a key existed and was removed.
    pub async fn reset(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key);
        let removed = self
            .with_deadline(self.store.delete(&full_key))
            .await
            .inspect_err(|e| error!(key = %full_key, error = %e, "Rate limit reset failed"))?;

        debug!(key = %full_key, removed, "Rate limit reset");
        Ok(removed)
    }

    async fn run(&self, script: Script, key: &str, limit: &Limit, n: u64) -> Result<Decision> {
        limit.validate()?;
        if n > MAX_REQUESTED {
            return Err(LimiterError::InvalidCount(n));
        }
        if n == 0 {
            return Ok(Decision::empty());
        }

        let full_key = self.full_key(key);
        trace!(key = %full_key, script = %script, limit = %limit, n, "Checking rate limit");

        let reply = self
            .with_deadline(self.store.evaluate(script, &full_key, ScriptArgs::new(limit, n)))
            .await
            .inspect_err(|e| error!(key = %full_key, error = %e, "Rate limit store call failed"))?;
        let decision = Decision::from_reply(reply)?;

        if !decision.is_allowed() {
            debug!(
                key = %full_key,
                requested = n,
                retry_after = decision.retry_after,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    async fn with_deadline<T>(
        &self,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| LimiterError::Timeout(timeout))?,
            None => call.await,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}
