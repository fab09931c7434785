//! REST adapter
//!
//! The signing page, payment page, and public verification endpoints. All
//! session mutations delegate to the skill core's canonical helpers; this
//! layer only parses and shapes JSON.

use super::AppState;
use crate::config::parse_display_amount;
use crate::crypto::operator_address;
use crate::enclave::AttestationVerifier;
use crate::facilitator::PaymentAuthorization;
use crate::skills::{CheckStatusParams, VerifyProofParams};
use crate::{ProofportError, Result};
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "paymentMode": state.config.payment_mode.as_str(),
        "teeMode": state.config.tee_mode.as_str(),
    }))
}

/// GET /api/signing/{id} - data for the signing page
pub async fn signing_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let session = state.core.sessions().get_required(&id).await?;
    Ok(Json(json!({
        "requestId": session.id,
        "circuitId": session.circuit_id,
        "scope": session.scope,
        "status": session.status,
        "address": session.address,
        "signalHash": session.signal_hash,
        "countryList": session.country_list,
        "isIncluded": session.is_included,
        "expiresAt": session.expires_at,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PrepareBody {
    pub address: String,
}

/// POST /api/signing/{id}/prepare - record the address, return the signal
/// hash to sign
pub async fn signing_prepare(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PrepareBody>,
) -> Result<Json<Value>> {
    let signal_hash = state.core.prepare_session(&id, &body.address).await?;
    Ok(Json(json!({ "signalHash": signal_hash })))
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    pub signature: String,
    pub address: String,
}

/// POST /api/signing/callback/{id} - record the signature and complete
/// signing
pub async fn signing_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CallbackBody>,
) -> Result<Json<Value>> {
    state
        .core
        .complete_session_signing(&id, &body.address, &body.signature)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/payment/{id} - data for the payment page
pub async fn payment_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    // The session must exist, but its content is not echoed to the payer
    state.core.sessions().get_required(&id).await?;
    if !state.config.payment_mode.required() {
        return Err(ProofportError::invalid_params("payment is disabled"));
    }
    let chain = state.config.payment_chain();
    let recipient = state
        .config
        .operator_key
        .as_ref()
        .map(|key| format!("0x{}", hex::encode(operator_address(key).as_bytes())))
        .ok_or_else(|| ProofportError::config("no operator key configured"))?;
    Ok(Json(json!({
        "recipient": recipient,
        "asset": chain.usdc_contract,
        "chainId": chain.chain_id,
        "network": chain.name,
        "displayAmount": state.config.price,
        "amount": parse_display_amount(&state.config.price)?.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub tx_hash: String,
}

/// POST /api/payment/confirm/{id} - mark the session paid
pub async fn payment_confirm(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<Value>> {
    state.core.confirm_session_payment(&id, &body.tx_hash).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct SignBody {
    pub authorization: PaymentAuthorization,
    pub signature: String,
}

/// POST /api/payment/sign/{id} - forward a signed authorization to the
/// facilitator and mark the session paid with the returned hash
pub async fn payment_sign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SignBody>,
) -> Result<Json<Value>> {
    // Same preconditions as a manual confirm, checked before settling
    let session = state.core.sessions().get_required(&id).await?;
    if session.status != crate::types::SessionStatus::Completed {
        return Err(ProofportError::invalid_params(
            "signing is not complete; payment cannot be settled yet",
        ));
    }

    let chain = state.config.payment_chain();
    let recipient = state
        .config
        .operator_key
        .as_ref()
        .map(|key| format!("0x{}", hex::encode(operator_address(key).as_bytes())))
        .ok_or_else(|| ProofportError::config("no operator key configured"))?;
    let amount_units = parse_display_amount(&state.config.price)?.to_string();

    let settle = state
        .facilitator
        .settle(
            &body.authorization,
            &body.signature,
            &chain.name,
            &chain.usdc_contract,
            &recipient,
            &amount_units,
        )
        .await?;
    if !settle.success {
        return Err(ProofportError::dependency(format!(
            "facilitator declined settlement: {}",
            settle.error_reason.as_deref().unwrap_or("unspecified")
        )));
    }

    state
        .core
        .confirm_session_payment(&id, &settle.transaction)
        .await?;
    Ok(Json(json!({ "success": true, "txHash": settle.transaction })))
}

/// GET /api/v1/session/{id} - session introspection
pub async fn session_introspect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let status = state
        .core
        .check_status(CheckStatusParams { request_id: id })
        .await?;
    Ok(Json(serde_json::to_value(status)?))
}

/// GET /api/v1/verify/{proof_id} - verification-page data, including a
/// live on-chain verdict
pub async fn verify_page_data(
    State(state): State<AppState>,
    Path(proof_id): Path<String>,
) -> Result<Json<Value>> {
    let stored = state.core.proofs().get_required(&proof_id).await?;
    let verdict = state
        .core
        .verify_proof(VerifyProofParams {
            proof_id: Some(proof_id.clone()),
            ..Default::default()
        })
        .await?;
    Ok(Json(json!({
        "proofId": stored.proof_id,
        "circuitId": stored.circuit_id,
        "nullifier": stored.nullifier,
        "signalHash": stored.signal_hash,
        "createdAt": stored.created_at,
        "hasAttestation": stored.attestation.is_some(),
        "verification": verdict,
    })))
}

/// GET /api/v1/attestation/{proof_id} - attestation snapshot plus its
/// verification result
pub async fn attestation_data(
    State(state): State<AppState>,
    Path(proof_id): Path<String>,
) -> Result<Json<Value>> {
    let stored = state.core.proofs().get_required(&proof_id).await?;
    let snapshot = stored.attestation.ok_or_else(|| {
        ProofportError::not_found(format!("proof {} carries no attestation", proof_id))
    })?;

    let verifier = AttestationVerifier::new(
        state.config.attestation_max_age,
        state.config.expected_pcrs.clone(),
    );
    let verification = verifier.verify(&snapshot.document);

    Ok(Json(json!({
        "proofId": proof_id,
        "attestation": snapshot,
        "verification": verification,
    })))
}
