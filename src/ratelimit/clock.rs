//! Clock abstractions for stores that keep their own time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// 2017-01-01T00:00:00Z, the epoch TAT values are expressed against.
pub const TAT_EPOCH_UNIX_SECS: u64 = 1_483_228_800;

/// The store-side time source. Every evaluation against a key must read the
/// same clock, so the clock belongs to the store and never to a caller.
pub trait StoreClock: Send + Sync + std::fmt::Debug {
    /// Seconds since [`TAT_EPOCH_UNIX_SECS`].
    fn now(&self) -> f64;
}

/// Wall clock, in the same domain the Redis scripts compute from `TIME`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl StoreClock for SystemClock {
    fn now(&self) -> f64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        since_unix.as_secs_f64() - TAT_EPOCH_UNIX_SECS as f64
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by.as_secs_f64();
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl StoreClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
