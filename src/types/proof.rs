//! Durable proof results and the content-addressed proof cache
//!
//! A [`ProofResult`] is written once at the end of `generate_proof` and is
//! read-only afterwards; it backs the public verification page. A
//! [`ProofCacheEntry`] memoizes the prover output under a key derived from
//! the full proving request so an identical request short-circuits the
//! prover while still minting a fresh `proof_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Snapshot of the attestation bound to a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationSnapshot {
    /// Base64 attestation envelope as returned by the prover
    pub document: String,
    /// TEE mode the document was produced under
    pub mode: String,
    /// Hex hash of the proof bytes the document is bound to
    pub proof_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable output of a proof generation, stored at `proof:{proof_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    pub proof_id: String,
    /// Opaque proof bytes, 0x-hex on the wire
    pub proof: String,
    /// Normalized 32-byte hex chunks
    pub public_inputs: Vec<String>,
    pub circuit_id: String,
    pub nullifier: String,
    pub signal_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationSnapshot>,
    pub created_at: DateTime<Utc>,
}

/// Memoized prover output, stored at `cache:proof:{key}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofCacheEntry {
    pub proof: String,
    pub public_inputs: Vec<String>,
    pub nullifier: String,
    pub signal_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationSnapshot>,
}

/// Canonical form of a country list: uppercase ASCII, sorted
pub fn canonical_country_list(countries: &[String]) -> Vec<String> {
    let mut canonical: Vec<String> = countries.iter().map(|c| c.to_ascii_uppercase()).collect();
    canonical.sort();
    canonical
}

/// Content key for the proof cache
pub fn proof_cache_key(
    circuit_id: &str,
    address: &str,
    scope: &str,
    country_list: Option<&[String]>,
    is_included: Option<bool>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(circuit_id.as_bytes());
    hasher.update(address.to_lowercase().as_bytes());
    hasher.update(scope.as_bytes());
    if let Some(countries) = country_list {
        for c in canonical_country_list(countries) {
            hasher.update(c.as_bytes());
        }
    }
    hasher.update([is_included.unwrap_or(false) as u8]);
    hex::encode(hasher.finalize())
}

/// Normalize public inputs into 32-byte hex chunks
///
/// The prover may return either a ready-made list of 32-byte words or a
/// single concatenated hex blob; a blob is split into 64-hex-char words.
/// The function is idempotent: feeding its output back returns it unchanged.
pub fn normalize_public_inputs(inputs: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for input in inputs {
        let stripped = input.trim_start_matches("0x");
        if stripped.len() > 64 && stripped.len() % 64 == 0 {
            for chunk in stripped.as_bytes().chunks(64) {
                // Chunks of a str split at 64-byte boundaries of hex are valid utf8
                out.push(format!("0x{}", String::from_utf8_lossy(chunk).to_lowercase()));
            }
        } else {
            out.push(format!("0x{}", stripped.to_lowercase()));
        }
    }
    out
}
