//! Sliding-window rate limiter
//!
//! Per-subject admission over the KV window primitive. An arrival above
//! capacity is denied with a `retry_after` equal to the time until the
//! oldest arrival in the window ages out. The KV layer records the window
//! atomically, so the limiter is safe under concurrent workers.

use crate::kv::Kv;
use crate::{ProofportError, Result};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-subject sliding-window rate limiter, keyed `rate:{subject}`
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn Kv>,
    capacity: u64,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter with the given capacity per window
    pub fn new(kv: Arc<dyn Kv>, capacity: u64, window: Duration) -> Self {
        Self {
            kv,
            capacity,
            window,
        }
    }

    fn key(subject: &str) -> String {
        format!("rate:{}", subject.to_lowercase())
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Admit or deny one arrival for a subject
    pub async fn check(&self, subject: &str) -> Result<()> {
        let now = Self::now_ms();
        let state = self
            .kv
            .window_add(&Self::key(subject), now, self.window)
            .await?;
        if state.count <= self.capacity {
            return Ok(());
        }
        let window_ms = self.window.as_millis() as u64;
        let elapsed = now.saturating_sub(state.oldest_ms);
        let retry_after_ms = window_ms.saturating_sub(elapsed);
        tracing::debug!(
            subject,
            count = state.count,
            capacity = self.capacity,
            retry_after_ms,
            "rate limit exceeded"
        );
        Err(ProofportError::RateLimited {
            retry_after_secs: retry_after_ms.div_ceil(1000).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn limiter(capacity: u64, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKv::new()), capacity, window)
    }

    #[tokio::test]
    async fn test_admits_up_to_capacity_then_denies() {
        let limiter = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.check("0xaaaa").await.unwrap();
        }
        let err = limiter.check("0xaaaa").await.unwrap_err();
        match err {
            ProofportError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs >= 1);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.check("0xaaaa").await.unwrap();
        limiter.check("0xbbbb").await.unwrap();
        assert!(limiter.check("0xaaaa").await.is_err());
    }

    #[tokio::test]
    async fn test_subject_case_is_normalized() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.check("0xAAAA").await.unwrap();
        assert!(limiter.check("0xaaaa").await.is_err());
    }

    #[tokio::test]
    async fn test_admitted_again_after_window_elapses() {
        let limiter = limiter(1, Duration::from_millis(80));
        limiter.check("0xaaaa").await.unwrap();
        assert!(limiter.check("0xaaaa").await.is_err());
        tokio::time::sleep(Duration::from_millis(120)).await;
        limiter.check("0xaaaa").await.unwrap();
    }
}
