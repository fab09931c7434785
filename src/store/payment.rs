//! Payment ledger store
//!
//! Rows are created by protocol adapters when a validated payment header
//! accompanies a task request; every transition out of `pending` is owned
//! by the settlement worker.

use crate::kv::Kv;
use crate::types::{PaymentRecord, PaymentSettlementStatus};
use crate::{ProofportError, Result};
use chrono::Utc;
use std::sync::Arc;

/// Store for payment ledger rows, keyed `payment:{id}`
#[derive(Clone)]
pub struct PaymentStore {
    kv: Arc<dyn Kv>,
}

impl PaymentStore {
    /// Create a payment store
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key(id: &str) -> String {
        format!("payment:{}", id)
    }

    /// Persist a ledger row
    pub async fn put(&self, record: &PaymentRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.kv.set(&Self::key(&record.id), &raw, None).await
    }

    /// Load a ledger row
    pub async fn get(&self, id: &str) -> Result<Option<PaymentRecord>> {
        match self.kv.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All rows still awaiting settlement
    pub async fn list_pending(&self) -> Result<Vec<PaymentRecord>> {
        let mut pending = Vec::new();
        for key in self.kv.scan_prefix("payment:").await? {
            if let Some(raw) = self.kv.get(&key).await? {
                let record: PaymentRecord = serde_json::from_str(&raw)?;
                if record.status == PaymentSettlementStatus::Pending {
                    pending.push(record);
                }
            }
        }
        Ok(pending)
    }

    /// Mark a row settled with its transaction hash
    ///
    /// Refuses to overwrite an already settled row so exactly one hash is
    /// ever recorded per payment id.
    pub async fn mark_settled(&self, id: &str, tx_hash: &str) -> Result<PaymentRecord> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| ProofportError::not_found(format!("payment {} not found", id)))?;
        if record.status == PaymentSettlementStatus::Settled {
            return Err(ProofportError::invalid_transition(format!(
                "payment {} already settled",
                id
            )));
        }
        record.status = PaymentSettlementStatus::Settled;
        record.tx_hash = Some(tx_hash.to_string());
        record.updated_at = Utc::now();
        self.put(&record).await?;
        Ok(record)
    }

    /// Mark a row failed
    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        if let Some(mut record) = self.get(id).await? {
            if record.status != PaymentSettlementStatus::Settled {
                record.status = PaymentSettlementStatus::Failed;
                record.updated_at = Utc::now();
                self.put(&record).await?;
            }
        }
        Ok(())
    }
}
