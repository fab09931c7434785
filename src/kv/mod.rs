//! Storage trait for the shared KV store
//!
//! Every typed store in the service (sessions, tasks, proofs, payments,
//! rate buckets, chat sessions) goes through this trait, so tests run on
//! the in-memory implementation while deployments use Redis.
//!
//! The primitives mirror what the service actually needs from the KV
//! layer: TTL'd string values, one FIFO list per key, prefix scans for the
//! settlement worker, and an atomic sliding-window record used by the rate
//! limiter.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod redis_kv;

pub use redis_kv::RedisKv;

/// Observed state of a sliding window after recording an arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Arrivals inside the window, including the one just recorded
    pub count: u64,
    /// Stamp of the oldest arrival still inside the window, ms since epoch
    pub oldest_ms: u64,
}

/// Trait over the durable map + list primitives
#[async_trait]
pub trait Kv: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remaining TTL for a key; `None` when the key is missing or unexpiring
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Reset the TTL of an existing key; returns false when the key is gone
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key
    async fn del(&self, key: &str) -> Result<()>;

    /// Push onto the head of a list
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Pop from the tail of a list (FIFO with [`Kv::lpush`])
    async fn rpop(&self, key: &str) -> Result<Option<String>>;

    /// All keys starting with a prefix
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Record an arrival into a per-key sliding window, evicting arrivals
    /// older than `window`, and return the resulting window state
    async fn window_add(&self, key: &str, stamp_ms: u64, window: Duration) -> Result<WindowState>;
}

/// In-memory implementation
///
/// The default for tests. TTLs are honored lazily on read.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: std::sync::Arc<tokio::sync::Mutex<MemoryKvInner>>,
}

#[derive(Debug, Default)]
struct MemoryKvInner {
    values: std::collections::HashMap<String, (String, Option<std::time::Instant>)>,
    lists: std::collections::HashMap<String, std::collections::VecDeque<String>>,
    windows: std::collections::HashMap<String, Vec<u64>>,
}

impl MemoryKv {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryKvInner {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = match self.values.get(key) {
            Some((_, Some(deadline))) => *deadline <= std::time::Instant::now(),
            Some((_, None)) => false,
            None => return None,
        };
        if expired {
            self.values.remove(key);
            return None;
        }
        self.values.get(key).map(|(v, _)| v)
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_value(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let deadline = ttl.map(|t| std::time::Instant::now() + t);
        inner.values.insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut inner = self.inner.lock().await;
        if inner.live_value(key).is_none() {
            return Ok(None);
        }
        Ok(inner.values.get(key).and_then(|(_, deadline)| {
            deadline.map(|d| d.saturating_duration_since(std::time::Instant::now()))
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live_value(key).is_none() {
            return Ok(false);
        }
        if let Some(entry) = inner.values.get_mut(key) {
            entry.1 = Some(std::time::Instant::now() + ttl);
            return Ok(true);
        }
        Ok(false)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.values.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.lists.get_mut(key).and_then(|l| l.pop_back()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        // Re-check liveness so expired keys never surface
        let mut live = Vec::new();
        for key in keys {
            if inner.live_value(&key).is_some() {
                live.push(key);
            }
        }
        Ok(live)
    }

    async fn window_add(&self, key: &str, stamp_ms: u64, window: Duration) -> Result<WindowState> {
        let mut inner = self.inner.lock().await;
        let stamps = inner.windows.entry(key.to_string()).or_default();
        let cutoff = stamp_ms.saturating_sub(window.as_millis() as u64);
        stamps.retain(|s| *s > cutoff);
        stamps.push(stamp_ms);
        let oldest = stamps.iter().min().copied().unwrap_or(stamp_ms);
        Ok(WindowState {
            count: stamps.len() as u64,
            oldest_ms: oldest,
        })
    }
}
