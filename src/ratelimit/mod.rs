//! GCRA rate limiting over a shared store.

mod blocking;
pub mod clock;
mod decision;
pub mod gcra;
mod limit;
mod limiter;
mod memory;
mod policies;
mod redis_store;
mod store;

pub use blocking::BlockingRateLimiter;
pub use clock::{ManualClock, StoreClock, SystemClock};
pub use decision::{Decision, RETRY_IMMEDIATELY};
pub use limit::{Limit, TimeUnit};
pub use limiter::{RateLimiter, DEFAULT_KEY_PREFIX, MAX_REQUESTED};
pub use memory::{MemoryStore, DEFAULT_SWEEP_EVERY};
pub use policies::{PolicyRule, PolicySet};
pub use redis_store::RedisStore;
pub use store::{GcraStore, RawReply, Script, ScriptArgs};
