//! Session skills: request_signing, check_status, request_payment

use super::SkillCore;
use crate::types::circuit::{self, ChainConfig};
use crate::types::{PaymentStatus, SessionPhase, SessionRecord, SessionStatus};
use crate::{ProofportError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parameters of request_signing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSigningParams {
    pub circuit_id: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_included: Option<bool>,
}

/// Result of request_signing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSigningResult {
    pub request_id: String,
    pub signing_url: String,
    pub expires_at: DateTime<Utc>,
    pub circuit_id: String,
    pub scope: String,
}

/// Parameters of check_status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusParams {
    pub request_id: String,
}

/// Signing sub-state reported by check_status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningInfo {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_url: Option<String>,
}

/// Payment sub-state reported by check_status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

/// Circuit/verifier details attached when the session is ready
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyCircuitInfo {
    pub circuit_id: String,
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_explorer_url: Option<String>,
}

/// Result of check_status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResult {
    pub phase: SessionPhase,
    pub signing: SigningInfo,
    pub payment: PaymentInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<ReadyCircuitInfo>,
    pub expires_at: DateTime<Utc>,
}

/// Parameters of request_payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPaymentParams {
    pub request_id: String,
}

/// Result of request_payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPaymentResult {
    pub payment_url: String,
    pub amount: String,
    pub currency: String,
    pub network: String,
}

impl SkillCore {
    /// Start a proof session
    ///
    /// Validates the circuit id, scope, and country fields, then creates a
    /// pending session with the configured TTL. No I/O beyond the KV store.
    pub async fn request_signing(
        &self,
        params: RequestSigningParams,
    ) -> Result<RequestSigningResult> {
        let info = circuit::circuit(&params.circuit_id).ok_or_else(|| {
            ProofportError::invalid_params(format!(
                "unknown circuit {}; use get_supported_circuits to discover valid ids",
                params.circuit_id
            ))
        })?;
        if params.scope.trim().is_empty() {
            return Err(ProofportError::invalid_params(
                "scope must be a non-empty string; it defines the nullifier domain",
            ));
        }
        if info.country_fields {
            let country_list = params.country_list.as_deref().unwrap_or_default();
            if country_list.is_empty() {
                return Err(ProofportError::invalid_params(format!(
                    "circuit {} requires a non-empty countryList",
                    params.circuit_id
                )));
            }
            if params.is_included.is_none() {
                return Err(ProofportError::invalid_params(format!(
                    "circuit {} requires isIncluded",
                    params.circuit_id
                )));
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let ttl = chrono::Duration::from_std(self.config.session_ttl)
            .map_err(|_| ProofportError::config("session TTL out of range"))?;
        let mut session = SessionRecord::new(&request_id, &params.circuit_id, &params.scope, ttl);
        if info.country_fields {
            session.country_list = params.country_list.clone();
            session.is_included = params.is_included;
        }
        self.sessions.put(&session).await?;

        tracing::info!(
            request_id,
            circuit_id = %params.circuit_id,
            scope = %params.scope,
            "signing session created"
        );

        Ok(RequestSigningResult {
            signing_url: self.config.signing_url(&request_id),
            request_id,
            expires_at: session.expires_at,
            circuit_id: params.circuit_id,
            scope: params.scope,
        })
    }

    /// Report the deterministic phase of a session; no side effects
    pub async fn check_status(&self, params: CheckStatusParams) -> Result<CheckStatusResult> {
        let session = self.sessions.get_required(&params.request_id).await?;
        let payment_required = self.config.payment_mode.required();
        let phase = session.phase(payment_required, Utc::now());

        let circuit = if phase == SessionPhase::Ready {
            let chain = self.config.payment_chain();
            let verifier = circuit::verifier_address(chain.chain_id, &session.circuit_id);
            Some(ReadyCircuitInfo {
                circuit_id: session.circuit_id.clone(),
                chain_id: chain.chain_id,
                verifier_address: verifier.map(str::to_string),
                verifier_explorer_url: verifier.map(|addr| chain.explorer_address_url(addr)),
            })
        } else {
            None
        };

        Ok(CheckStatusResult {
            phase,
            signing: SigningInfo {
                status: session.status,
                address: session.address.clone(),
                signing_url: (session.status == SessionStatus::Pending)
                    .then(|| self.config.signing_url(&session.id)),
            },
            payment: PaymentInfo {
                required: payment_required,
                status: session.payment_status,
                tx_hash: session.payment_tx_hash.clone(),
                amount: payment_required.then(|| self.config.price.clone()),
            },
            circuit,
            expires_at: session.expires_at,
        })
    }

    /// Return the payment URL for a signed session
    ///
    /// Idempotent: repeated calls return the same URL and leave an already
    /// pending payment status untouched. Each call resets the session TTL
    /// to its original value so the payer is not raced by expiry.
    pub async fn request_payment(
        &self,
        params: RequestPaymentParams,
    ) -> Result<RequestPaymentResult> {
        let mut session = self.sessions.get_required(&params.request_id).await?;

        if session.status != SessionStatus::Completed {
            return Err(ProofportError::invalid_params(
                "signing is not complete; have the wallet holder open the signing URL first",
            ));
        }
        if !self.config.payment_mode.required() {
            return Err(ProofportError::invalid_params(
                "payment is disabled; call generate_proof directly",
            ));
        }
        if session.payment_status == Some(PaymentStatus::Completed) {
            return Err(ProofportError::invalid_params(
                "payment is already completed; call generate_proof",
            ));
        }

        if session.payment_status.is_none() {
            session.payment_status = Some(PaymentStatus::Pending);
            self.sessions.put_preserving_ttl(&session).await?;
        }
        // Give the payer the full window again
        self.sessions.extend_ttl(&session.id).await?;

        let chain: ChainConfig = self.config.payment_chain();
        Ok(RequestPaymentResult {
            payment_url: self.config.payment_url(&session.id),
            amount: self.config.price.clone(),
            currency: "USDC".to_string(),
            network: chain.name,
        })
    }

    /// Signing-page prepare: record the wallet address and derive the
    /// signal hash
    ///
    /// Refuses terminal sessions and address changes. Idempotent for a
    /// repeated prepare with the same address; the signal hash is never
    /// rewritten once set.
    pub async fn prepare_session(&self, request_id: &str, address: &str) -> Result<String> {
        let mut session = self.sessions.get_required(request_id).await?;
        if session.is_terminal() || session.is_expired(Utc::now()) {
            return Err(ProofportError::invalid_params(
                "session is no longer accepting signatures",
            ));
        }
        crate::crypto::parse_address(address)?;
        if let Some(stored) = &session.address {
            if !stored.eq_ignore_ascii_case(address) {
                return Err(ProofportError::invalid_params(
                    "address does not match the address this session was prepared with",
                ));
            }
            if let Some(signal_hash) = &session.signal_hash {
                return Ok(signal_hash.clone());
            }
        }

        let signal_hash = crate::crypto::to_hex32(crate::crypto::signal_hash(
            address,
            &session.scope,
            &session.circuit_id,
        )?);
        session.address = Some(address.to_string());
        session.signal_hash = Some(signal_hash.clone());
        self.sessions.put_preserving_ttl(&session).await?;
        Ok(signal_hash)
    }

    /// Signing-page callback: record the signature and complete signing
    ///
    /// Refuses non-pending sessions and address mismatches.
    pub async fn complete_session_signing(
        &self,
        request_id: &str,
        address: &str,
        signature: &str,
    ) -> Result<()> {
        let mut session = self.sessions.get_required(request_id).await?;
        if session.status != SessionStatus::Pending || session.is_expired(Utc::now()) {
            return Err(ProofportError::invalid_params(
                "session is not pending; signatures are no longer accepted",
            ));
        }
        if let Some(stored) = &session.address {
            if !stored.eq_ignore_ascii_case(address) {
                return Err(ProofportError::invalid_params(
                    "address does not match the address this session was prepared with",
                ));
            }
        }
        crate::crypto::parse_signature(signature)?;

        if session.address.is_none() {
            // Callback without a prior prepare; derive the hash now
            crate::crypto::parse_address(address)?;
            session.signal_hash = Some(crate::crypto::to_hex32(crate::crypto::signal_hash(
                address,
                &session.scope,
                &session.circuit_id,
            )?));
            session.address = Some(address.to_string());
        }
        session.signature = Some(signature.to_string());
        session.status = SessionStatus::Completed;
        self.sessions.put_preserving_ttl(&session).await?;

        tracing::info!(request_id, "signing completed");
        Ok(())
    }

    /// Payment-page confirm: mark the session paid with its transaction hash
    pub async fn confirm_session_payment(&self, request_id: &str, tx_hash: &str) -> Result<()> {
        let mut session = self.sessions.get_required(request_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(ProofportError::invalid_params(
                "signing is not complete; payment cannot be confirmed yet",
            ));
        }
        if !self.config.payment_mode.required() {
            return Err(ProofportError::invalid_params("payment is disabled"));
        }
        if session.payment_status == Some(PaymentStatus::Completed) {
            return Err(ProofportError::invalid_params("payment is already completed"));
        }
        if tx_hash.trim().is_empty() {
            return Err(ProofportError::invalid_params("txHash must be non-empty"));
        }
        session.payment_status = Some(PaymentStatus::Completed);
        session.payment_tx_hash = Some(tx_hash.to_string());
        self.sessions.put_preserving_ttl(&session).await?;

        tracing::info!(request_id, tx_hash, "payment confirmed");
        Ok(())
    }
}
