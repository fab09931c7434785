//! Signing-session records
//!
//! A session binds one proof-generation attempt: created by
//! `request_signing`, advanced by the browser signing page (prepare, then
//! callback), optionally gated on payment, consumed and deleted by a
//! successful `generate_proof`.
//!
//! Invariants enforced by the mutation sites, checkable on any record:
//! - `status == Completed` implies `address`, `signal_hash` and `signature`
//!   are set
//! - `payment_status == Completed` implies `payment_tx_hash` is set
//! - country circuits carry a non-empty `country_list` and an inclusion flag
//! - `signal_hash` is never rewritten once set

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Signing status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Expired,
}

/// Payment sub-status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

/// Deterministic phase reported by check_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Signing,
    Payment,
    Ready,
    Expired,
}

/// A signing-session record, stored at `signing:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Opaque URL-safe identifier
    pub id: String,
    /// Circuit this session will prove
    pub circuit_id: String,
    /// Nullifier domain
    pub scope: String,
    /// Signing status
    pub status: SessionStatus,
    /// Wallet address, set by the prepare endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// 32-byte hex signal hash, derived from (address, scope, circuit_id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_hash: Option<String>,
    /// 65-byte hex signature, set by the signing callback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Country set, present only for the country circuit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_list: Option<Vec<String>>,
    /// Inclusion flag, present only for the country circuit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_included: Option<bool>,
    /// Payment sub-status; absent when payment was never requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    /// Settlement transaction hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry deadline
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a fresh pending session
    pub fn new(
        id: impl Into<String>,
        circuit_id: impl Into<String>,
        scope: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            circuit_id: circuit_id.into(),
            scope: scope.into(),
            status: SessionStatus::Pending,
            address: None,
            signal_hash: None,
            signature: None,
            country_list: None,
            is_included: None,
            payment_status: None,
            payment_tx_hash: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the session has passed its expiry deadline
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether the session reached a terminal signing state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Expired)
    }

    /// Derive the phase reported by check_status
    pub fn phase(&self, payment_required: bool, now: DateTime<Utc>) -> SessionPhase {
        if self.is_expired(now) {
            return SessionPhase::Expired;
        }
        if self.status != SessionStatus::Completed {
            return SessionPhase::Signing;
        }
        if payment_required && self.payment_status != Some(PaymentStatus::Completed) {
            return SessionPhase::Payment;
        }
        SessionPhase::Ready
    }
}
