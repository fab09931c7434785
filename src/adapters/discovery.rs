//! Discovery documents
//!
//! Three static JSON documents at well-known URIs, derived from config:
//! the agent card (protocol 0.3), its legacy alias, and the TEE metadata
//! document.

use super::AppState;
use crate::skills::ALL_SKILLS;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Task protocol version advertised on the card
const PROTOCOL_VERSION: &str = "0.3.0";

fn card(state: &AppState) -> Value {
    let base = &state.config.external_base_url;
    json!({
        "name": "proofport",
        "description": "Agent-facing zero-knowledge proof service: signed identity attestations \
                        bound to fresh nullifiers, with x402 micropayments",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": PROTOCOL_VERSION,
        "url": format!("{}/a2a", base),
        "preferredTransport": "JSONRPC",
        "capabilities": {
            "streaming": true,
            "pushNotifications": false,
            "stateTransitionHistory": true,
        },
        "defaultInputModes": ["text/plain", "application/json"],
        "defaultOutputModes": ["application/json"],
        "skills": ALL_SKILLS.iter().map(|skill| json!({
            "id": skill.as_str(),
            "name": skill.as_str(),
            "description": skill.description(),
            "tags": ["zero-knowledge", "identity"],
        })).collect::<Vec<_>>(),
    })
}

/// GET /.well-known/agent-card.json
pub async fn agent_card(State(state): State<AppState>) -> Json<Value> {
    Json(card(&state))
}

/// GET /.well-known/agent.json (legacy alias)
pub async fn agent_card_legacy(State(state): State<AppState>) -> Json<Value> {
    Json(card(&state))
}

/// GET /.well-known/tee.json
pub async fn tee_metadata(State(state): State<AppState>) -> Json<Value> {
    let pcr_hex = |pcr: &Option<Vec<u8>>| pcr.as_ref().map(hex::encode);
    Json(json!({
        "teeMode": state.config.tee_mode.as_str(),
        "attestationEnabled": state.config.attestation_enabled,
        "expectedPcrs": {
            "pcr0": pcr_hex(&state.config.expected_pcrs.pcr0),
            "pcr1": pcr_hex(&state.config.expected_pcrs.pcr1),
            "pcr2": pcr_hex(&state.config.expected_pcrs.pcr2),
        },
        "maxAttestationAgeSeconds": state.config.attestation_max_age.as_secs(),
        "attestationEndpoint": format!("{}/api/v1/attestation/{{proofId}}", state.config.external_base_url),
    }))
}
