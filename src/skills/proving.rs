//! generate_proof: the proving pipeline
//!
//! Session mode loads the signed (and, when required, paid) session and
//! consumes it on success; direct mode takes the signing material inline
//! and is only available when payment is disabled.
//!
//! Pipeline: rate-limit admit → cache lookup → witness build → prove →
//! attest (when the prover did not attach one) → normalize public inputs →
//! persist cache entry and proof result → delete the session (session mode
//! only, and only on complete success; any failure leaves the session in
//! place so the caller can retry without re-signing or re-paying).

use super::SkillCore;
use crate::types::circuit;
use crate::types::{
    normalize_public_inputs, proof_cache_key, AttestationSnapshot, ProofCacheEntry, ProofResult,
    SessionRecord, SessionStatus,
};
use crate::witness::WitnessRequest;
use crate::{ProofportError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Parameters of generate_proof; `request_id` selects session mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_included: Option<bool>,
}

/// Result of generate_proof
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofResult {
    pub proof: String,
    pub public_inputs: Vec<String>,
    pub nullifier: String,
    pub signal_hash: String,
    pub proof_id: String,
    pub verify_url: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_explorer_url: Option<String>,
    pub chain_id: u64,
}

/// Signing material resolved from either mode
struct ProvingMaterial {
    address: String,
    signature: String,
    scope: String,
    circuit_id: String,
    country_list: Option<Vec<String>>,
    is_included: Option<bool>,
    payment_tx_hash: Option<String>,
}

impl SkillCore {
    /// Generate a proof; see the module docs for the pipeline
    pub async fn generate_proof(
        &self,
        params: GenerateProofParams,
    ) -> Result<GenerateProofResult> {
        let (material, session) = self.resolve_material(params).await?;

        // 1. Rate-limit admission on the proving address
        self.rate_limiter.check(&material.address).await?;

        // 2. Cache lookup; a hit short-circuits the prover entirely
        let cache_key = proof_cache_key(
            &material.circuit_id,
            &material.address,
            &material.scope,
            material.country_list.as_deref(),
            material.is_included,
        );
        if let Some(hit) = self.cache.get(&cache_key).await? {
            tracing::info!(circuit_id = %material.circuit_id, "proof cache hit");
            return self.finish(&material, session.as_ref(), hit, true).await;
        }

        // 3. Circuit parameters from the witness builder
        let signal_hash = crate::crypto::to_hex32(crate::crypto::signal_hash(
            &material.address,
            &material.scope,
            &material.circuit_id,
        )?);
        let witness_request = WitnessRequest {
            circuit_id: material.circuit_id.clone(),
            address: material.address.clone(),
            signature: material.signature.clone(),
            scope: material.scope.clone(),
            signal_hash: signal_hash.clone(),
            country_list: material.country_list.clone(),
            is_included: material.is_included,
        };
        let prover_input = self.witness.build(&witness_request).await?;

        // 4. Prove; the idempotency id is the session id when there is one
        let request_id = session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let output = self
            .prover
            .prove(&material.circuit_id, &prover_input, &request_id)
            .await?;

        // 5. Attest separately when the prover did not attach one
        let attestation = match &output.attestation_doc {
            Some(document) => Some(self.snapshot(document, &output.proof)),
            None if self.config.attestation_enabled && self.prover.supports_attestation() => {
                let proof_hash = hash_proof(&output.proof);
                self.prover
                    .attest(&proof_hash)
                    .await?
                    .map(|document| self.snapshot(&document, &output.proof))
            }
            None => None,
        };

        // 6. Normalize public inputs into 32-byte chunks
        let public_inputs = normalize_public_inputs(&output.public_inputs);
        let nullifier = extract_nullifier(&public_inputs);

        // 7. Memoize for identical future requests
        let entry = ProofCacheEntry {
            proof: output.proof,
            public_inputs,
            nullifier,
            signal_hash,
            attestation,
        };
        self.cache.put(&cache_key, &entry).await?;

        // 8. Persist the result and consume the session
        self.finish(&material, session.as_ref(), entry, false).await
    }

    /// Resolve signing material from session or direct mode
    async fn resolve_material(
        &self,
        params: GenerateProofParams,
    ) -> Result<(ProvingMaterial, Option<SessionRecord>)> {
        if let Some(request_id) = &params.request_id {
            let session = self.sessions.get_required(request_id).await?;
            if session.is_expired(Utc::now()) {
                return Err(ProofportError::not_found(format!(
                    "session {} has expired; call request_signing again",
                    request_id
                )));
            }
            if session.status != SessionStatus::Completed {
                return Err(ProofportError::invalid_params(
                    "signing is not complete; check_status reports the current phase",
                ));
            }
            if self.config.payment_mode.required()
                && session.payment_status != Some(crate::types::PaymentStatus::Completed)
            {
                return Err(ProofportError::invalid_params(
                    "payment is not complete; call request_payment first",
                ));
            }
            // Completed sessions carry address, signature and signal hash
            let address = session.address.clone().ok_or_else(|| {
                ProofportError::internal("completed session is missing its address")
            })?;
            let signature = session.signature.clone().ok_or_else(|| {
                ProofportError::internal("completed session is missing its signature")
            })?;
            let material = ProvingMaterial {
                address,
                signature,
                scope: session.scope.clone(),
                circuit_id: session.circuit_id.clone(),
                country_list: session.country_list.clone(),
                is_included: session.is_included,
                payment_tx_hash: session.payment_tx_hash.clone(),
            };
            return Ok((material, Some(session)));
        }

        // Direct mode
        if self.config.payment_mode.required() {
            return Err(ProofportError::invalid_params(
                "direct mode is unavailable while payment is enabled; use request_signing",
            ));
        }
        let circuit_id = params
            .circuit_id
            .ok_or_else(|| ProofportError::invalid_params("circuitId is required"))?;
        let info = circuit::circuit(&circuit_id).ok_or_else(|| {
            ProofportError::invalid_params(format!(
                "unknown circuit {}; use get_supported_circuits to discover valid ids",
                circuit_id
            ))
        })?;
        let address = params
            .address
            .ok_or_else(|| ProofportError::invalid_params("address is required"))?;
        let signature = params
            .signature
            .ok_or_else(|| ProofportError::invalid_params("signature is required"))?;
        let scope = params
            .scope
            .ok_or_else(|| ProofportError::invalid_params("scope is required"))?;
        crate::crypto::parse_address(&address)?;
        crate::crypto::parse_signature(&signature)?;
        if info.country_fields {
            if params.country_list.as_deref().unwrap_or_default().is_empty() {
                return Err(ProofportError::invalid_params(format!(
                    "circuit {} requires a non-empty countryList",
                    circuit_id
                )));
            }
            if params.is_included.is_none() {
                return Err(ProofportError::invalid_params(format!(
                    "circuit {} requires isIncluded",
                    circuit_id
                )));
            }
        }
        Ok((
            ProvingMaterial {
                address,
                signature,
                scope,
                circuit_id,
                country_list: params.country_list,
                is_included: params.is_included,
                payment_tx_hash: None,
            },
            None,
        ))
    }

    fn snapshot(&self, document: &str, proof: &str) -> AttestationSnapshot {
        AttestationSnapshot {
            document: document.to_string(),
            mode: self.config.tee_mode.as_str().to_string(),
            proof_hash: hash_proof(proof),
            timestamp: Utc::now(),
        }
    }

    /// Record the proof result, delete the session, and shape the response
    async fn finish(
        &self,
        material: &ProvingMaterial,
        session: Option<&SessionRecord>,
        entry: ProofCacheEntry,
        cached: bool,
    ) -> Result<GenerateProofResult> {
        let proof_id = Uuid::new_v4().to_string();
        let result = ProofResult {
            proof_id: proof_id.clone(),
            proof: entry.proof.clone(),
            public_inputs: entry.public_inputs.clone(),
            circuit_id: material.circuit_id.clone(),
            nullifier: entry.nullifier.clone(),
            signal_hash: entry.signal_hash.clone(),
            attestation: entry.attestation.clone(),
            created_at: Utc::now(),
        };
        self.proofs.put(&result).await?;

        // The session is consumed only once the result is durably written
        if let Some(session) = session {
            self.sessions.delete(&session.id).await?;
            tracing::info!(session_id = %session.id, proof_id, "session consumed");
        }

        let chain = self.config.payment_chain();
        let verifier = circuit::verifier_address(chain.chain_id, &material.circuit_id);
        Ok(GenerateProofResult {
            proof: entry.proof,
            public_inputs: entry.public_inputs,
            nullifier: entry.nullifier,
            signal_hash: entry.signal_hash,
            verify_url: self.config.verify_url(&proof_id),
            proof_id,
            cached,
            attestation: entry.attestation,
            payment_tx_hash: material.payment_tx_hash.clone(),
            verifier_address: verifier.map(str::to_string),
            verifier_explorer_url: verifier.map(|addr| chain.explorer_address_url(addr)),
            chain_id: chain.chain_id,
        })
    }
}

/// Hex SHA-256 of the proof bytes; the binding input of a standalone
/// attestation request
pub fn hash_proof(proof_hex: &str) -> String {
    let bytes = hex::decode(proof_hex.trim_start_matches("0x")).unwrap_or_default();
    format!("0x{}", hex::encode(Sha256::digest(bytes)))
}

/// The nullifier is the first public signal by circuit convention
fn extract_nullifier(public_inputs: &[String]) -> String {
    public_inputs.first().cloned().unwrap_or_else(|| "0x".to_string())
}
