//! verify_proof and get_supported_circuits

use super::SkillCore;
use crate::chain::VerifyOutcome;
use crate::types::circuit::{self, ChainConfig};
use crate::{ProofportError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of verify_proof: either a stored `proof_id` or inline
/// circuit/proof/inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyProofParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_inputs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Result of verify_proof
///
/// A verifier revert is a *successful* response with `valid = false` and
/// the reason in `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyProofResult {
    pub valid: bool,
    pub circuit_id: String,
    pub verifier_address: String,
    pub chain_id: u64,
    pub verifier_explorer_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of get_supported_circuits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSupportedCircuitsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// One circuit in the supported list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub requires_country_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_explorer_url: Option<String>,
}

/// Result of get_supported_circuits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSupportedCircuitsResult {
    pub circuits: Vec<CircuitSummary>,
    pub chain_id: u64,
}

impl SkillCore {
    /// Verify a proof against the on-chain verifier
    pub async fn verify_proof(&self, params: VerifyProofParams) -> Result<VerifyProofResult> {
        let chain_id = params.chain_id.unwrap_or_else(|| self.config.default_chain_id());
        let chain = ChainConfig::from_chain_id(chain_id).ok_or_else(|| {
            ProofportError::invalid_params(format!("unsupported chain {}", chain_id))
        })?;

        let (circuit_id, proof_hex, public_inputs) = match &params.proof_id {
            Some(proof_id) => {
                let stored = self.proofs.get_required(proof_id).await?;
                (stored.circuit_id, stored.proof, stored.public_inputs)
            }
            None => {
                let circuit_id = params.circuit_id.clone().ok_or_else(|| {
                    ProofportError::invalid_params("either proofId or circuitId is required")
                })?;
                let proof = params.proof.clone().ok_or_else(|| {
                    ProofportError::invalid_params("proof is required without proofId")
                })?;
                let public_inputs = params.public_inputs.clone().ok_or_else(|| {
                    ProofportError::invalid_params("publicInputs is required without proofId")
                })?;
                (circuit_id, proof, public_inputs)
            }
        };

        let verifier_address = circuit::verifier_address(chain_id, &circuit_id)
            .ok_or_else(|| {
                ProofportError::invalid_params(format!(
                    "circuit {} has no verifier deployed on chain {}; \
                     use get_supported_circuits to see deployments",
                    circuit_id, chain_id
                ))
            })?
            .to_string();
        let verifier = crate::crypto::parse_address(&verifier_address)?;

        let proof_bytes = hex::decode(proof_hex.trim_start_matches("0x"))
            .map_err(|_| ProofportError::invalid_params("proof is not valid hex"))?;
        let mut input_words = Vec::with_capacity(public_inputs.len());
        for input in &public_inputs {
            let bytes = hex::decode(input.trim_start_matches("0x"))
                .map_err(|_| ProofportError::invalid_params("public input is not valid hex"))?;
            if bytes.len() != 32 {
                return Err(ProofportError::invalid_params(
                    "each public input must be exactly 32 bytes",
                ));
            }
            let mut word = [0u8; 32];
            word.copy_from_slice(&bytes);
            input_words.push(word);
        }

        let outcome = self
            .chain
            .verify_proof(chain_id, verifier, &proof_bytes, &input_words)
            .await?;
        let (valid, error) = match outcome {
            VerifyOutcome::Completed(valid) => (valid, None),
            VerifyOutcome::Reverted(reason) => (false, Some(reason)),
        };

        Ok(VerifyProofResult {
            valid,
            circuit_id,
            verifier_explorer_url: chain.explorer_address_url(&verifier_address),
            verifier_address,
            chain_id,
            error,
        })
    }

    /// List supported circuits with their deployments on a chain
    pub async fn get_supported_circuits(
        &self,
        params: GetSupportedCircuitsParams,
    ) -> Result<GetSupportedCircuitsResult> {
        let chain_id = params.chain_id.unwrap_or_else(|| self.config.default_chain_id());
        let chain = ChainConfig::from_chain_id(chain_id);

        let circuits = circuit::CIRCUITS
            .iter()
            .map(|info| {
                let verifier = circuit::verifier_address(chain_id, info.id);
                CircuitSummary {
                    id: info.id.to_string(),
                    name: info.name.to_string(),
                    description: info.description.to_string(),
                    requires_country_list: info.country_fields,
                    verifier_address: verifier.map(str::to_string),
                    verifier_explorer_url: verifier.and_then(|addr| {
                        chain.as_ref().map(|c| c.explorer_address_url(addr))
                    }),
                }
            })
            .collect();

        Ok(GetSupportedCircuitsResult { circuits, chain_id })
    }
}
