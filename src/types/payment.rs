//! Payment ledger rows and payment-header decoding
//!
//! When a protocol adapter serves a paid request, the accompanying payment
//! header (already funds-checked by the HTTP payment gate upstream) is
//! recorded as a [`PaymentRecord`] with `status = pending`. The settlement
//! worker owns every transition out of `pending`.
//!
//! The header payload is base64-wrapped CBOR. Older clients put the payer at
//! the top-level `from` field, newer ones nest it under `proof.from`; both
//! are accepted, and a JSON body is accepted as a decode fallback.

use crate::{ProofportError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Settlement status of a payment ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSettlementStatus {
    Pending,
    Settled,
    Failed,
}

/// A settlement ledger row, stored at `payment:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    /// Task the payment accompanied
    pub task_id: String,
    pub payer_address: String,
    /// Display amount, e.g. "$0.10"
    pub amount: String,
    pub network: String,
    pub status: PaymentSettlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Create a pending ledger row
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        payer_address: impl Into<String>,
        amount: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_id: task_id.into(),
            payer_address: payer_address.into(),
            amount: amount.into(),
            network: network.into(),
            status: PaymentSettlementStatus::Pending,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Nested proof object carrying the payer in newer payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProofField {
    pub from: String,
}

/// Decoded payment-header payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentHeaderPayload {
    pub scheme: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<PaymentProofField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl PaymentHeaderPayload {
    /// Decode a base64 payment header (CBOR body, JSON accepted as fallback)
    pub fn from_header(header: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(header.trim())
            .map_err(|_| ProofportError::invalid_params("payment header is not valid base64"))?;

        if let Ok(payload) = ciborium::from_reader::<Self, _>(bytes.as_slice()) {
            return Ok(payload);
        }
        serde_json::from_slice(&bytes).map_err(|_| {
            ProofportError::invalid_params("payment header is neither CBOR nor JSON")
        })
    }

    /// The payer address, wherever the payload version put it
    pub fn payer(&self) -> Option<&str> {
        self.proof
            .as_ref()
            .map(|p| p.from.as_str())
            .or(self.from.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_cbor(payload: &PaymentHeaderPayload) -> String {
        let mut buf = Vec::new();
        ciborium::into_writer(payload, &mut buf).unwrap();
        general_purpose::STANDARD.encode(buf)
    }

    #[test]
    fn test_decode_cbor_with_nested_payer() {
        let header = encode_cbor(&PaymentHeaderPayload {
            scheme: "exact".into(),
            network: "base-sepolia".into(),
            proof: Some(PaymentProofField {
                from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".into(),
            }),
            from: None,
        });
        let decoded = PaymentHeaderPayload::from_header(&header).unwrap();
        assert_eq!(
            decoded.payer(),
            Some("0x857b06519E91e3A54538791bDbb0E22373e36b66")
        );
        assert_eq!(decoded.network, "base-sepolia");
    }

    #[test]
    fn test_decode_cbor_with_top_level_payer() {
        let header = encode_cbor(&PaymentHeaderPayload {
            scheme: "exact".into(),
            network: "base".into(),
            proof: None,
            from: Some("0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into()),
        });
        let decoded = PaymentHeaderPayload::from_header(&header).unwrap();
        assert_eq!(
            decoded.payer(),
            Some("0x209693Bc6afc0C5328bA36FaF03C514EF312287C")
        );
    }

    #[test]
    fn test_decode_json_fallback() {
        let json = serde_json::json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "from": "0x857b06519E91e3A54538791bDbb0E22373e36b66"
        });
        let header = general_purpose::STANDARD.encode(json.to_string());
        let decoded = PaymentHeaderPayload::from_header(&header).unwrap();
        assert_eq!(decoded.scheme, "exact");
        assert!(decoded.payer().is_some());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(PaymentHeaderPayload::from_header("!!!not-base64!!!").is_err());
        let header = general_purpose::STANDARD.encode(b"neither cbor nor json");
        assert!(PaymentHeaderPayload::from_header(&header).is_err());
    }

    #[test]
    fn test_new_record_is_pending() {
        let r = PaymentRecord::new("p1", "t1", "0xabc", "$0.10", "base-sepolia");
        assert_eq!(r.status, PaymentSettlementStatus::Pending);
        assert!(r.tx_hash.is_none());
    }
}
