//! Shared key-value store abstraction.
//!
//! A single store instance is shared by all workers and request handlers;
//! it holds the hash cache, the per-dataset locks, the job queue, and
//! cached compare responses. Production uses Redis; tests substitute the
//! in-memory fake from ferry-test-utils.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Operations the engine needs from the shared store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key; `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write a key with an expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomic set-if-absent with an expiry; returns whether the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key; deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Push onto the head of a list.
    async fn lpush(&self, list: &str, value: &str) -> Result<()>;

    /// Pop from the tail of a list; `None` when empty.
    async fn rpop(&self, list: &str) -> Result<Option<String>>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}

/// Redis-backed store used in production.
///
/// The connection manager reconnects transparently; clones share the
/// underlying multiplexed connection.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        Ok(Self { conn })
    }
}

fn unavailable(err: redis::RedisError) -> Error {
    Error::CacheUnavailable {
        message: err.to_string(),
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn lpush(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(list)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn rpop(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("RPOP")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
