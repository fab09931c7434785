//! Redis-backed implementation of the [`Kv`] trait
//!
//! Uses a multiplexed connection manager so the handle is cheap to clone
//! across workers. Sliding windows are sorted sets mutated in a single
//! pipeline so concurrent workers observe consistent counts.

use super::{Kv, WindowState};
use crate::Result;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

/// Redis-backed KV store
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Connect to Redis
    ///
    /// Fails fast when the server is unreachable so startup can abort with
    /// a clear error instead of limping along.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await?;
        // -2 missing key, -1 no expiry
        if ttl < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(ttl as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        Ok(conn.expire(key, ttl.as_secs().max(1) as i64).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.rpop(key, None).await?)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn window_add(&self, key: &str, stamp_ms: u64, window: Duration) -> Result<WindowState> {
        let mut conn = self.manager.clone();
        let cutoff = stamp_ms.saturating_sub(window.as_millis() as u64);
        // Evict, record, count, and read the oldest stamp in one pipeline so
        // concurrent callers never see a partially updated window. The
        // member carries a random suffix so simultaneous arrivals with the
        // same millisecond stamp both count.
        let member = format!("{}-{:08x}", stamp_ms, rand::random::<u32>());
        let (_, _, count, oldest): ((), (), u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, cutoff as f64)
            .zadd(key, &member, stamp_ms as f64)
            .zcard(key)
            .zrange_withscores(key, 0, 0)
            .query_async(&mut conn)
            .await?;
        // Keep the bucket from outliving an idle window
        conn.expire::<_, ()>(key, (window.as_secs() * 2).max(1) as i64)
            .await?;
        let oldest_ms = oldest
            .first()
            .map(|(_, score)| *score as u64)
            .unwrap_or(stamp_ms);
        Ok(WindowState { count, oldest_ms })
    }
}
