//! In-process GCRA store.
//!
//! Shares quota between every limiter holding the same store within one
//! process. Evaluations against one key are serialized by the map's entry
//! lock, which makes the TAT read-modify-write atomic.
//!
//! Expired keys are dropped when touched, swept every
//! [`DEFAULT_SWEEP_EVERY`] evaluations, and optionally by a background task
//! started with [`MemoryStore::spawn_purger`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::{StoreClock, SystemClock};
use super::gcra::{self, TatUpdate};
use super::store::{GcraStore, RawReply, Script, ScriptArgs};
use crate::error::Result;

/// Evaluations between two sweeps of expired keys.
pub const DEFAULT_SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct TatState {
    tat: f64,
    expires_at: f64,
}

impl TatState {
    fn new(update: TatUpdate, now: f64) -> Self {
        Self {
            tat: update.tat,
            expires_at: now + update.ttl.as_secs_f64(),
        }
    }

    fn is_live(&self, now: f64) -> bool {
        now < self.expires_at
    }
}

/// A [`GcraStore`] held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, TatState>,
    clock: Arc<dyn StoreClock>,
    /// Evaluations since creation, drives the periodic sweep
    evaluations: AtomicU64,
    /// Sweep after this many evaluations, 0 disables
    sweep_every: u64,
}

impl MemoryStore {
    /// Create a store driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn StoreClock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            evaluations: AtomicU64::new(0),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }

    /// Sweep expired keys after every `every` evaluations; 0 turns the
    /// sweep off.
    pub fn with_sweep_every(mut self, every: u64) -> Self {
        self.sweep_every = every;
        self
    }

    /// Purge expired keys on `interval` until the store is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_purger(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge_expired();
            }
        })
    }

    /// Number of keys that have not yet expired.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The persisted TAT of `key`, if it has not expired.
    pub fn tat(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|state| *state.value())
            .filter(|state| state.is_live(now))
            .map(|state| state.tat)
    }

    /// Drop expired keys, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, state| state.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired rate limit keys");
        }
        removed
    }

    fn maybe_sweep(&self) {
        if self.sweep_every == 0 {
            return;
        }
        let count = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.sweep_every == 0 {
            self.purge_expired();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GcraStore for MemoryStore {
    async fn evaluate(&self, script: Script, key: &str, args: ScriptArgs) -> Result<RawReply> {
        let outcome = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let now = self.clock.now();
                let current = *occupied.get();
                let stored = current.is_live(now).then_some(current.tat);
                let outcome = gcra::evaluate(script, stored, now, &args);
                match outcome.update {
                    Some(update) => {
                        occupied.insert(TatState::new(update, now));
                    }
                    None if stored.is_none() => {
                        occupied.remove();
                    }
                    None => {}
                }
                outcome
            }
            Entry::Vacant(vacant) => {
                let now = self.clock.now();
                let outcome = gcra::evaluate(script, None, now, &args);
                if let Some(update) = outcome.update {
                    vacant.insert(TatState::new(update, now));
                }
                outcome
            }
        };

        // All entry guards are released here; sweeping needs every shard.
        self.maybe_sweep();

        trace!(
            key = %key,
            script = %script,
            allowed = outcome.reply.allowed,
            "Evaluated GCRA in memory"
        );

        Ok(outcome.reply)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, state)| state.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::limit::Limit;

    fn store_at(start: f64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(start);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn args(count: u64) -> ScriptArgs {
        ScriptArgs::new(&Limit::new(10, 10, Duration::from_secs(60)), count)
    }

    #[tokio::test]
    async fn test_grant_persists_tat() {
        let (store, _clock) = store_at(100.0);

        let reply = store.evaluate(Script::AllowN, "k", args(2)).await.unwrap();
        assert_eq!(reply.allowed, 2);
        assert_eq!(store.tat("k"), Some(112.0));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_denial_leaves_state_untouched() {
        let (store, _clock) = store_at(100.0);

        store.evaluate(Script::AllowN, "k", args(10)).await.unwrap();
        let before = store.tat("k");

        let reply = store.evaluate(Script::AllowN, "k", args(1)).await.unwrap();
        assert_eq!(reply.allowed, 0);
        assert_eq!(store.tat("k"), before);
    }

    #[tokio::test]
    async fn test_denial_on_fresh_key_creates_nothing() {
        let (store, _clock) = store_at(100.0);

        let reply = store.evaluate(Script::AllowN, "k", args(11)).await.unwrap();
        assert_eq!(reply.allowed, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_key_expires_after_reset_after() {
        let (store, clock) = store_at(100.0);

        store.evaluate(Script::AllowN, "k", args(1)).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(store.tat("k").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.tat("k").is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_at(0.0);

        store.evaluate(Script::AllowN, "short", args(1)).await.unwrap();
        store.evaluate(Script::AllowN, "long", args(5)).await.unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.tat("long").is_some());
    }

    #[tokio::test]
    async fn test_idle_keys_are_swept_without_being_touched() {
        let clock = ManualClock::new(0.0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone())).with_sweep_every(1_000);

        for i in 0..1_000 {
            store.evaluate(Script::AllowN, &format!("k{i}"), args(1)).await.unwrap();
        }
        assert_eq!(store.entries.len(), 1_000);

        clock.advance(Duration::from_secs(3600));
        for _ in 0..1_000 {
            store.evaluate(Script::AllowN, "active", args(1)).await.unwrap();
        }

        // Only the key still in use survives.
        assert_eq!(store.entries.len(), 1);
        assert!(store.tat("active").is_some());
    }

    #[tokio::test]
    async fn test_sweep_disabled() {
        let clock = ManualClock::new(0.0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone())).with_sweep_every(0);

        store.evaluate(Script::AllowN, "idle", args(1)).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        store.evaluate(Script::AllowN, "other", args(1)).await.unwrap();

        assert_eq!(store.entries.len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_purger() {
        let clock = ManualClock::new(0.0);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())).with_sweep_every(0));

        for i in 0..100 {
            store.evaluate(Script::AllowN, &format!("k{i}"), args(1)).await.unwrap();
        }
        let purger = store.spawn_purger(Duration::from_secs(1));

        clock.advance(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.entries.len(), 0);

        // The task ends once the store is gone.
        drop(store);
        tokio::time::timeout(Duration::from_secs(5), purger)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _clock) = store_at(0.0);

        store.evaluate(Script::AllowN, "k", args(1)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
