//! Remote key-value backend over Redis
//!
//! Built on a [`ConnectionManager`], which multiplexes concurrent commands
//! over one connection and reconnects in the background after a connection
//! loss (at least one command fails, then recovery is automatic). Every
//! method can fail with `Error::BackendUnavailable`; the engine's read and
//! write paths fail open to the local backend, while invalidation surfaces
//! the failure to its caller.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::BackendStore;
use crate::error::Result;

/// Networked key-value backend
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the given URL and verify reachability with a PING.
    ///
    /// An unreachable server fails here (and only here) so backend
    /// selection can fall back to the local implementation at startup.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl BackendStore for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // Millisecond precision so sub-second windows survive the backend
        let millis = (ttl.as_millis() as u64).max(1);
        let _: () = conn.pset_ex(key, value.as_ref(), millis).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        // DEL of an absent key returns 0, which is a success here
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn entry_count(&self) -> u64 {
        // The remote backend does not expose a per-namespace count cheaply
        0
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
