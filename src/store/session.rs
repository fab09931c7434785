//! Session store: CRUD + TTL on signing-session records
//!
//! Skill Core is the general owner of session mutations. The two signing-page
//! endpoints (prepare, callback) are the only other writers, and both
//! validate the prior state through [`SessionStore::get`] before mutating.

use crate::kv::Kv;
use crate::types::SessionRecord;
use crate::{ProofportError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Store for signing-session records, keyed `signing:{id}`
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn Kv>,
    default_ttl: Duration,
}

impl SessionStore {
    /// Create a session store with the configured default TTL
    pub fn new(kv: Arc<dyn Kv>, default_ttl: Duration) -> Self {
        Self { kv, default_ttl }
    }

    fn key(id: &str) -> String {
        format!("signing:{}", id)
    }

    /// The configured default TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Load a session; `None` when unknown or expired out of the store
    pub async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        match self.kv.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a session or fail with a NotFound error naming the id
    pub async fn get_required(&self, id: &str) -> Result<SessionRecord> {
        self.get(id).await?.ok_or_else(|| {
            ProofportError::not_found(format!("session {} unknown or expired", id))
        })
    }

    /// Write a session with the default TTL
    pub async fn put(&self, session: &SessionRecord) -> Result<()> {
        self.put_with_ttl(session, self.default_ttl).await
    }

    /// Write a session with an explicit TTL
    pub async fn put_with_ttl(&self, session: &SessionRecord, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.kv.set(&Self::key(&session.id), &raw, Some(ttl)).await
    }

    /// Write a session keeping its current remaining TTL, falling back to
    /// the default when the remaining TTL is gone or negative
    pub async fn put_preserving_ttl(&self, session: &SessionRecord) -> Result<()> {
        let remaining = self.kv.ttl(&Self::key(&session.id)).await?;
        let ttl = match remaining {
            Some(t) if !t.is_zero() => t,
            _ => self.default_ttl,
        };
        self.put_with_ttl(session, ttl).await
    }

    /// Reset the TTL of a stored session to the default
    pub async fn extend_ttl(&self, id: &str) -> Result<bool> {
        self.kv.expire(&Self::key(id), self.default_ttl).await
    }

    /// Delete a session
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.kv.del(&Self::key(id)).await
    }
}
