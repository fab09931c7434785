//! Prover interface
//!
//! `generate_proof` talks to the prover through this trait. Two
//! implementations exist: [`EnclaveProver`] drives the framed transport to
//! the isolated prover process (the `local` and `enclave-hw` TEE modes);
//! [`LocalBinaryProver`] shells out to a prover binary from the circuits
//! directory for TEE-disabled deployments.

use crate::enclave::{EnclaveRequest, EnclaveTransport};
use crate::{ProofportError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Output of a proving run
#[derive(Debug, Clone)]
pub struct ProverOutput {
    /// Proof bytes, hex
    pub proof: String,
    /// Public inputs; possibly one concatenated blob, normalized upstream
    pub public_inputs: Vec<String>,
    /// Attestation envelope, when the prover attached one
    pub attestation_doc: Option<String>,
}

/// Black-box prover interface
#[async_trait]
pub trait Prover: Send + Sync {
    /// Generate a proof for a circuit from a prover-input document
    async fn prove(&self, circuit_id: &str, input: &Value, request_id: &str)
        -> Result<ProverOutput>;

    /// Request a standalone attestation bound to a proof hash; `None` when
    /// the prover cannot attest
    async fn attest(&self, proof_hash: &str) -> Result<Option<String>>;

    /// Whether this prover can produce attestations at all
    fn supports_attestation(&self) -> bool;
}

/// Prover behind the enclave transport
#[derive(Debug, Clone)]
pub struct EnclaveProver {
    transport: EnclaveTransport,
    /// TEE mode string recorded into attestation snapshots
    pub mode: String,
}

impl EnclaveProver {
    /// Create a prover over the given transport
    pub fn new(transport: EnclaveTransport, mode: impl Into<String>) -> Self {
        Self {
            transport,
            mode: mode.into(),
        }
    }
}

#[async_trait]
impl Prover for EnclaveProver {
    async fn prove(
        &self,
        circuit_id: &str,
        input: &Value,
        request_id: &str,
    ) -> Result<ProverOutput> {
        let response = self
            .transport
            .send(&EnclaveRequest::Prove {
                circuit_id: circuit_id.to_string(),
                input: input.clone(),
                request_id: request_id.to_string(),
            })
            .await?;
        let proof = response
            .proof
            .ok_or_else(|| ProofportError::dependency("enclave returned no proof bytes"))?;
        Ok(ProverOutput {
            proof,
            public_inputs: response.public_inputs.unwrap_or_default(),
            attestation_doc: response.attestation_doc,
        })
    }

    async fn attest(&self, proof_hash: &str) -> Result<Option<String>> {
        let response = self
            .transport
            .send(&EnclaveRequest::Attest {
                proof_hash: proof_hash.to_string(),
                context: None,
            })
            .await?;
        Ok(response.attestation_doc)
    }

    fn supports_attestation(&self) -> bool {
        true
    }
}

/// Prover that invokes a local binary per circuit
///
/// Used when the TEE is disabled. The binary at
/// `{circuits_dir}/{circuit_id}/prove` reads the input document on stdin
/// and writes a JSON `{proof, publicInputs}` document on stdout.
#[derive(Debug, Clone)]
pub struct LocalBinaryProver {
    circuits_dir: std::path::PathBuf,
}

impl LocalBinaryProver {
    /// Create a local prover rooted at the circuits directory
    pub fn new(circuits_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            circuits_dir: circuits_dir.into(),
        }
    }
}

#[async_trait]
impl Prover for LocalBinaryProver {
    async fn prove(
        &self,
        circuit_id: &str,
        input: &Value,
        _request_id: &str,
    ) -> Result<ProverOutput> {
        use tokio::io::AsyncWriteExt;

        let binary = self.circuits_dir.join(circuit_id).join("prove");
        let mut child = tokio::process::Command::new(&binary)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                ProofportError::dependency(format!(
                    "failed to start prover {}: {}",
                    binary.display(),
                    e
                ))
            })?;

        let stdin_doc = serde_json::to_vec(input)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&stdin_doc).await.map_err(|e| {
                ProofportError::dependency(format!("failed to feed prover: {}", e))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ProofportError::dependency(format!("prover did not complete: {}", e))
        })?;
        if !output.status.success() {
            return Err(ProofportError::dependency(format!(
                "prover exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_prover_document(&output.stdout)
    }

    async fn attest(&self, _proof_hash: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn supports_attestation(&self) -> bool {
        false
    }
}

/// Parse the `{proof, publicInputs}` document a prover binary writes on
/// stdout
fn parse_prover_document(stdout: &[u8]) -> Result<ProverOutput> {
    let document: Value = serde_json::from_slice(stdout)?;
    let proof = document
        .get("proof")
        .and_then(Value::as_str)
        .ok_or_else(|| ProofportError::dependency("prover output is missing proof"))?
        .to_string();
    let public_inputs = document
        .get("publicInputs")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(ProverOutput {
        proof,
        public_inputs,
        attestation_doc: None,
    })
}
