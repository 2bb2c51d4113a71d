//! Blocking facade over [`RateLimiter`].
//!
//! Runs the async facade to completion on a private current-thread runtime,
//! so both call styles share one code path and produce the same decisions.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use super::decision::Decision;
use super::limit::Limit;
use super::limiter::RateLimiter;
use super::store::GcraStore;
use crate::config::{LimiterConfig, StoreConfig};
use crate::error::{LimiterError, Result};

/// A rate limiter for threads that are not driven by an async runtime.
///
/// Must not be called or dropped from inside an async context; calls made
/// there fail with [`LimiterError::BlockingInAsync`].
pub struct BlockingRateLimiter {
    inner: RateLimiter,
    runtime: Runtime,
}

impl BlockingRateLimiter {
    /// Create a blocking limiter over `store` with default settings.
    pub fn new(store: Arc<dyn GcraStore>) -> Result<Self> {
        Self::from_limiter(RateLimiter::new(store))
    }

    /// Wrap an existing async limiter.
    ///
    /// The limiter's store must not depend on another runtime's background
    /// tasks; use [`BlockingRateLimiter::connect`] for network stores.
    pub fn from_limiter(inner: RateLimiter) -> Result<Self> {
        Ok(Self {
            inner,
            runtime: build_runtime()?,
        })
    }

    /// Build the configured store on this limiter's own runtime.
    pub fn connect(store: &StoreConfig, limiter: &LimiterConfig) -> Result<Self> {
        ensure_blocking_context()?;
        let runtime = build_runtime()?;
        let inner = runtime.block_on(RateLimiter::from_config(store, limiter))?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped async limiter.
    pub fn inner(&self) -> &RateLimiter {
        &self.inner
    }

    /// Shortcut for `allow_n(key, limit, 1)`.
    pub fn allow(&self, key: &str, limit: &Limit) -> Result<Decision> {
        self.block_on(self.inner.allow(key, limit))
    }

    /// Blocking form of [`RateLimiter::allow_n`].
    pub fn allow_n(&self, key: &str, limit: &Limit, n: u64) -> Result<Decision> {
        self.block_on(self.inner.allow_n(key, limit, n))
    }

    /// Blocking form of [`RateLimiter::allow_at_most`].
    pub fn allow_at_most(&self, key: &str, limit: &Limit, n: u64) -> Result<Decision> {
        self.block_on(self.inner.allow_at_most(key, limit, n))
    }

    /// Blocking form of [`RateLimiter::reset`].
    pub fn reset(&self, key: &str) -> Result<bool> {
        self.block_on(self.inner.reset(key))
    }

    fn block_on<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        ensure_blocking_context()?;
        self.runtime.block_on(call)
    }
}

fn build_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(LimiterError::Runtime)
}

fn ensure_blocking_context() -> Result<()> {
    if Handle::try_current().is_ok() {
        return Err(LimiterError::BlockingInAsync);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::MemoryStore;
    use std::time::Duration;

    fn frozen_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_clock(Arc::new(ManualClock::new(0.0))))
    }

    #[test]
    fn test_blocking_allow_n_over_limit() {
        let limiter = BlockingRateLimiter::new(frozen_store()).unwrap();
        let limit = Limit::new(10, 10, Duration::from_secs(60));

        let first = limiter.allow_n("k", &limit, 8).unwrap();
        assert_eq!((first.allowed, first.remaining), (8, 2));

        let second = limiter.allow_n("k", &limit, 5).unwrap();
        assert_eq!((second.allowed, second.remaining), (0, 0));
        assert!(second.retry_after > 0.0);

        assert!(limiter.reset("k").unwrap());
        assert!(!limiter.reset("k").unwrap());
    }

    #[test]
    fn test_blocking_matches_async_decisions() {
        let limit = Limit::new(10, 10, Duration::from_secs(60));
        let requests = [3u64, 4, 5, 1, 2];

        let blocking = BlockingRateLimiter::new(frozen_store()).unwrap();
        let blocking_decisions: Vec<Decision> = requests
            .iter()
            .map(|&n| blocking.allow_at_most("k", &limit, n).unwrap())
            .collect();

        let runtime = build_runtime().unwrap();
        let limiter = RateLimiter::new(frozen_store());
        let async_decisions: Vec<Decision> = runtime.block_on(async {
            let mut out = Vec::new();
            for &n in &requests {
                out.push(limiter.allow_at_most("k", &limit, n).await.unwrap());
            }
            out
        });

        assert_eq!(blocking_decisions, async_decisions);
    }

    #[tokio::test]
    async fn test_blocking_inside_runtime_is_rejected() {
        let limiter = tokio::task::spawn_blocking(|| BlockingRateLimiter::new(frozen_store()))
            .await
            .unwrap()
            .unwrap();

        let err = limiter.allow("k", &Limit::per_second(1)).unwrap_err();
        assert!(matches!(err, LimiterError::BlockingInAsync));

        // Dropping a runtime inside an async context panics.
        tokio::task::spawn_blocking(move || drop(limiter)).await.unwrap();
    }
}
