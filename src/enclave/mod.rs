//! Transport to the isolated prover process
//!
//! The prover runs as a sibling process (a hardware enclave in production,
//! a local process in development) speaking a length-prefixed JSON
//! request/response protocol: a 4-byte big-endian length followed by one
//! JSON document in each direction, one request per connection.
//!
//! Connection-level faults (refused, reset, timed out, truncated frame)
//! are retried with geometric backoff; application-level errors reported
//! by the prover are terminal.
//!
//! - [`attestation`] - verification of the attestation envelope the prover
//!   returns

use crate::{ProofportError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub mod attestation;

pub use attestation::{AttestationVerification, AttestationVerifier};

/// Connection attempts before giving up
pub const MAX_RETRIES: u32 = 5;

/// Base delay of the geometric backoff between attempts
const BACKOFF_BASE: Duration = Duration::from_secs(3);

/// Per-attempt I/O timeout
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Frames larger than this are rejected as corrupt
const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// A request to the prover process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnclaveRequest {
    /// Generate a proof
    #[serde(rename_all = "camelCase")]
    Prove {
        circuit_id: String,
        /// Pre-rendered prover-input document
        input: Value,
        /// Idempotency id for the request
        request_id: String,
    },
    /// Liveness probe
    Health,
    /// Request an attestation bound to a proof hash
    #[serde(rename_all = "camelCase")]
    Attest {
        proof_hash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

/// A response from the prover process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    /// Proof bytes, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Public inputs: either a list of 32-byte words or one concatenated
    /// hex blob the caller must split
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_inputs: Option<Vec<String>>,
    /// Base64 attestation envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_doc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Framed request/response client to the prover
#[derive(Debug, Clone)]
pub struct EnclaveTransport {
    addr: String,
    backoff_base: Duration,
    attempt_timeout: Duration,
}

impl EnclaveTransport {
    /// Create a transport for the given `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            backoff_base: BACKOFF_BASE,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Override the backoff base (tests)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Override the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Send one request, retrying connection-level failures
    pub async fn send(&self, request: &EnclaveRequest) -> Result<EnclaveResponse> {
        let body = serde_json::to_vec(request)?;
        let mut delay = self.backoff_base;

        for attempt in 1..=MAX_RETRIES {
            match tokio::time::timeout(self.attempt_timeout, self.exchange(&body)).await {
                Ok(Ok(response)) => {
                    if response.response_type == "error" {
                        // The prover answered; its verdict is final
                        return Err(ProofportError::internal(format!(
                            "enclave error: {}",
                            response.error.as_deref().unwrap_or("unspecified")
                        )));
                    }
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        attempt,
                        max = MAX_RETRIES,
                        addr = %self.addr,
                        error = %err,
                        "enclave request failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        max = MAX_RETRIES,
                        addr = %self.addr,
                        "enclave request timed out"
                    );
                }
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(ProofportError::dependency(format!(
            "enclave at {} unreachable after {} attempts",
            self.addr, MAX_RETRIES
        )))
    }

    async fn exchange(&self, body: &[u8]) -> std::io::Result<EnclaveResponse> {
        let mut stream = TcpStream::connect(&self.addr).await?;

        stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
        stream.write_all(body).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_FRAME {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad frame length {}", len),
            ));
        }

        let mut frame = vec![0u8; len as usize];
        stream.read_exact(&mut frame).await?;
        serde_json::from_slice(&frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_prover<F>(respond: F) -> String
    where
        F: Fn(EnclaveRequest) -> EnclaveResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let mut len_buf = [0u8; 4];
                if socket.read_exact(&mut len_buf).await.is_err() {
                    continue;
                }
                let mut frame = vec![0u8; u32::from_be_bytes(len_buf) as usize];
                if socket.read_exact(&mut frame).await.is_err() {
                    continue;
                }
                let request: EnclaveRequest = serde_json::from_slice(&frame).unwrap();
                let response = serde_json::to_vec(&respond(request)).unwrap();
                let _ = socket.write_all(&(response.len() as u32).to_be_bytes()).await;
                let _ = socket.write_all(&response).await;
            }
        });
        addr
    }

    fn ok_response() -> EnclaveResponse {
        EnclaveResponse {
            response_type: "prove".to_string(),
            proof: Some(format!("0x{}", "ab".repeat(64))),
            public_inputs: Some(vec![format!("0x{}", "11".repeat(64))]),
            attestation_doc: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_prove_roundtrip() {
        let addr = spawn_prover(|request| {
            match request {
                EnclaveRequest::Prove { circuit_id, .. } => {
                    assert_eq!(circuit_id, "coinbase_attestation")
                }
                other => panic!("unexpected request {:?}", other),
            }
            ok_response()
        })
        .await;

        let transport = EnclaveTransport::new(addr);
        let response = transport
            .send(&EnclaveRequest::Prove {
                circuit_id: "coinbase_attestation".to_string(),
                input: serde_json::json!({"witness": []}),
                request_id: "r1".to_string(),
            })
            .await
            .unwrap();
        assert!(response.proof.is_some());
    }

    #[tokio::test]
    async fn test_application_error_is_not_retried() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen = counter.clone();
        let addr = spawn_prover(move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            EnclaveResponse {
                response_type: "error".to_string(),
                proof: None,
                public_inputs: None,
                attestation_doc: None,
                error: Some("unknown circuit".to_string()),
            }
        })
        .await;

        let transport =
            EnclaveTransport::new(addr).with_backoff_base(Duration::from_millis(5));
        let err = transport.send(&EnclaveRequest::Health).await.unwrap_err();
        assert!(err.to_string().contains("unknown circuit"));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        // Bind a port, then drop the listener so connections are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = EnclaveTransport::new(addr.clone())
            .with_backoff_base(Duration::from_millis(2))
            .with_attempt_timeout(Duration::from_millis(500));
        let err = transport.send(&EnclaveRequest::Health).await.unwrap_err();
        assert!(matches!(err, ProofportError::Dependency(_)));
        assert!(err.to_string().contains(&addr));
    }
}
