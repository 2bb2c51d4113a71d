//! Redis-backed GCRA store.
//!
//! Each decision is a single `EVALSHA` of the variant's Lua script, falling
//! back to `EVAL` when the server's script cache does not hold it. Redis runs
//! scripts atomically and the script reads `TIME` on the server, so any number
//! of processes can share the same keys.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::gcra::{ALLOW_AT_MOST_SCRIPT, ALLOW_N_SCRIPT};
use super::store::{GcraStore, RawReply, Script, ScriptArgs};
use crate::error::Result;

/// A [`GcraStore`] over a shared Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    allow_n: redis::Script,
    allow_at_most: redis::Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to Redis store");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            allow_n: redis::Script::new(ALLOW_N_SCRIPT),
            allow_at_most: redis::Script::new(ALLOW_AT_MOST_SCRIPT),
        }
    }

    fn script(&self, script: Script) -> &redis::Script {
        match script {
            Script::AllowN => &self.allow_n,
            Script::AllowAtMost => &self.allow_at_most,
        }
    }
}

#[async_trait]
impl GcraStore for RedisStore {
    async fn evaluate(&self, script: Script, key: &str, args: ScriptArgs) -> Result<RawReply> {
        let mut conn = self.conn.clone();
        let (allowed, remaining, retry_after, reset_after): (i64, i64, String, String) = self
            .script(script)
            .key(key)
            .arg(args.burst)
            .arg(args.rate)
            .arg(args.period_secs)
            .arg(args.count)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, script = %script, allowed, remaining, "Evaluated GCRA in Redis");

        Ok(RawReply {
            allowed,
            remaining,
            retry_after,
            reset_after,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed == 1)
    }
}
