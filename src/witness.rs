//! Witness builder interface
//!
//! The attestation source and merkle-tree builder live outside this
//! service; they take the signed session material and return a
//! circuit-ready prover-input document. Only the consumed interface is
//! specified here.

use crate::{ProofportError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Material the witness builder needs to assemble circuit parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessRequest {
    pub circuit_id: String,
    pub address: String,
    pub signature: String,
    pub scope: String,
    pub signal_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_included: Option<bool>,
}

/// Builder of circuit-ready prover inputs
#[async_trait]
pub trait WitnessSource: Send + Sync {
    /// Build the prover-input document for a request
    async fn build(&self, request: &WitnessRequest) -> Result<Value>;
}

/// HTTP-backed witness builder
#[derive(Debug, Clone)]
pub struct HttpWitnessSource {
    url: String,
    client: reqwest::Client,
}

impl HttpWitnessSource {
    /// Create a builder client for the configured endpoint
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProofportError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl WitnessSource for HttpWitnessSource {
    async fn build(&self, request: &WitnessRequest) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/witness", self.url))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ProofportError::dependency(format!("witness builder unreachable: {}", e))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProofportError::dependency(format!(
                "witness builder returned {}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn request() -> WitnessRequest {
        WitnessRequest {
            circuit_id: "coinbase_attestation".to_string(),
            address: "0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string(),
            signature: format!("0x{}", "11".repeat(65)),
            scope: "app.example".to_string(),
            signal_hash: format!("0x{}", "22".repeat(32)),
            country_list: None,
            is_included: None,
        }
    }

    #[tokio::test]
    async fn test_build_returns_document() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/witness")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"merkleRoot": "0xabc", "path": []}"#)
            .create();

        let source = HttpWitnessSource::new(server.url()).unwrap();
        let doc = source.build(&request()).await.unwrap();
        assert_eq!(doc["merkleRoot"], "0xabc");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_dependency_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/witness")
            .with_status(500)
            .with_body("attestation source down")
            .create();

        let source = HttpWitnessSource::new(server.url()).unwrap();
        let err = source.build(&request()).await.unwrap_err();
        assert!(matches!(err, ProofportError::Dependency(_)));
    }
}
