//! Proof result store and content-addressed proof cache

use crate::kv::Kv;
use crate::types::{ProofCacheEntry, ProofResult};
use crate::{ProofportError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Proof results live for a day; long enough for the verification page,
/// short enough that stale artifacts age out on their own
const PROOF_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache entries are short-lived; a repeat request inside the hour skips
/// the prover
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Store for durable proof results, keyed `proof:{proof_id}`
#[derive(Clone)]
pub struct ProofStore {
    kv: Arc<dyn Kv>,
}

impl ProofStore {
    /// Create a proof store
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key(proof_id: &str) -> String {
        format!("proof:{}", proof_id)
    }

    /// Persist a proof result
    pub async fn put(&self, result: &ProofResult) -> Result<()> {
        let raw = serde_json::to_string(result)?;
        self.kv
            .set(&Self::key(&result.proof_id), &raw, Some(PROOF_TTL))
            .await
    }

    /// Load a proof result
    pub async fn get(&self, proof_id: &str) -> Result<Option<ProofResult>> {
        match self.kv.get(&Self::key(proof_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a proof result or fail with NotFound
    pub async fn get_required(&self, proof_id: &str) -> Result<ProofResult> {
        self.get(proof_id).await?.ok_or_else(|| {
            ProofportError::not_found(format!("proof {} unknown or expired", proof_id))
        })
    }
}

/// Content-addressed proof cache, keyed `cache:proof:{key}`
#[derive(Clone)]
pub struct ProofCache {
    kv: Arc<dyn Kv>,
}

impl ProofCache {
    /// Create a proof cache
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key(content_key: &str) -> String {
        format!("cache:proof:{}", content_key)
    }

    /// Look up a cached prover result
    pub async fn get(&self, content_key: &str) -> Result<Option<ProofCacheEntry>> {
        match self.kv.get(&Self::key(content_key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Memoize a prover result; idempotent
    pub async fn put(&self, content_key: &str, entry: &ProofCacheEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.kv.set(&Self::key(content_key), &raw, Some(CACHE_TTL)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use chrono::Utc;

    fn proof_result(id: &str) -> ProofResult {
        ProofResult {
            proof_id: id.to_string(),
            proof: format!("0x{}", "ab".repeat(64)),
            public_inputs: vec![format!("0x{}", "11".repeat(32))],
            circuit_id: "coinbase_attestation".to_string(),
            nullifier: format!("0x{}", "22".repeat(32)),
            signal_hash: format!("0x{}", "33".repeat(32)),
            attestation: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_proof_roundtrip() {
        let store = ProofStore::new(Arc::new(MemoryKv::new()));
        let result = proof_result("p1");
        store.put(&result).await.unwrap();
        let loaded = store.get_required("p1").await.unwrap();
        assert_eq!(loaded.proof, result.proof);
        assert_eq!(loaded.public_inputs, result.public_inputs);
    }

    #[tokio::test]
    async fn test_missing_proof_is_not_found() {
        let store = ProofStore::new(Arc::new(MemoryKv::new()));
        let err = store.get_required("nope").await.unwrap_err();
        assert!(matches!(err, ProofportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cache_roundtrip_preserves_bytes() {
        let cache = ProofCache::new(Arc::new(MemoryKv::new()));
        let entry = ProofCacheEntry {
            proof: format!("0x{}", "cd".repeat(64)),
            public_inputs: vec![format!("0x{}", "44".repeat(32))],
            nullifier: format!("0x{}", "55".repeat(32)),
            signal_hash: format!("0x{}", "66".repeat(32)),
            attestation: None,
        };
        cache.put("k1", &entry).await.unwrap();
        let hit = cache.get("k1").await.unwrap().unwrap();
        assert_eq!(hit.proof, entry.proof);
        assert_eq!(hit.public_inputs, entry.public_inputs);
        // Writes are idempotent
        cache.put("k1", &entry).await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_miss_returns_none() {
        let cache = ProofCache::new(Arc::new(MemoryKv::new()));
        assert!(cache.get("absent").await.unwrap().is_none());
    }
}
