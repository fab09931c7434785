//! Facilitator client for payment settlement
//!
//! The payment-signing REST endpoint forwards a standard-scheme signed
//! authorization to the facilitator service, which executes the transfer
//! on-chain and returns the transaction hash. Verification of funds happens
//! upstream at the HTTP payment gate; this client only settles.

use crate::{ProofportError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Protocol version of the payment scheme
pub const PAYMENT_SCHEME_VERSION: u32 = 1;

/// EIP-3009 style transfer authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub from: String,
    pub to: String,
    /// Amount in atomic units
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    /// 32-byte random nonce
    pub nonce: String,
}

/// Settlement result returned by the facilitator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Settlement transaction hash
    pub transaction: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Client for the facilitator settlement API
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    url: String,
    client: Client,
}

impl FacilitatorClient {
    /// Create a facilitator client
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProofportError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// The facilitator base URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Settle a signed authorization
    pub async fn settle(
        &self,
        authorization: &PaymentAuthorization,
        signature: &str,
        network: &str,
        asset: &str,
        pay_to: &str,
        amount_units: &str,
    ) -> Result<SettleResponse> {
        let request_body = json!({
            "x402Version": PAYMENT_SCHEME_VERSION,
            "paymentPayload": {
                "x402Version": PAYMENT_SCHEME_VERSION,
                "scheme": "exact",
                "network": network,
                "payload": {
                    "signature": signature,
                    "authorization": authorization,
                },
            },
            "paymentRequirements": {
                "scheme": "exact",
                "network": network,
                "maxAmountRequired": amount_units,
                "asset": asset,
                "payTo": pay_to,
                "resource": "proof-generation",
                "description": "Zero-knowledge proof generation",
                "maxTimeoutSeconds": 60,
            },
        });

        tracing::debug!(url = %self.url, network, "settling payment authorization");

        let response = self
            .client
            .post(format!("{}/settle", self.url))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProofportError::dependency(format!("facilitator unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            tracing::error!(%status, body, "facilitator settle failed");
            return Err(ProofportError::dependency(format!(
                "settlement failed with status {}: {}",
                status, body
            )));
        }

        let settle_response: SettleResponse = response.json().await?;
        Ok(settle_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn authorization() -> PaymentAuthorization {
        PaymentAuthorization {
            from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string(),
            to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
            value: "100000".to_string(),
            valid_after: "1745323800".to_string(),
            valid_before: "1745323985".to_string(),
            nonce: "0xf3746613c2d920b5fdabc0856f2aeb2d4f88ee6037b8cc5d04a71a4462f13480"
                .to_string(),
        }
    }

    #[tokio::test]
    async fn test_settle_success() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/settle")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "transaction": "0x7a7a",
                    "network": "base-sepolia",
                    "payer": "0x857b06519E91e3A54538791bDbb0E22373e36b66",
                })
                .to_string(),
            )
            .create();

        let client = FacilitatorClient::new(server.url()).unwrap();
        let response = client
            .settle(
                &authorization(),
                "0xsig",
                "base-sepolia",
                "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                "100000",
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.transaction, "0x7a7a");
    }

    #[tokio::test]
    async fn test_settle_http_failure_is_dependency_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/settle")
            .with_status(502)
            .with_body("upstream out to lunch")
            .create();

        let client = FacilitatorClient::new(server.url()).unwrap();
        let err = client
            .settle(
                &authorization(),
                "0xsig",
                "base-sepolia",
                "0x0",
                "0x0",
                "100000",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProofportError::Dependency(_)));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_settle_unsuccessful_result_passes_through() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/settle")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": false,
                    "errorReason": "authorization_expired",
                    "transaction": "",
                    "network": "base-sepolia",
                })
                .to_string(),
            )
            .create();

        let client = FacilitatorClient::new(server.url()).unwrap();
        let response = client
            .settle(&authorization(), "0xsig", "base-sepolia", "0x0", "0x0", "1")
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error_reason.as_deref(), Some("authorization_expired"));
    }
}
