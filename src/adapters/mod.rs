//! Protocol adapters
//!
//! Four thin surfaces over the same skill core, plus the discovery
//! documents. Adapters parse their wire format, validate shape, and
//! dispatch; no business logic lives here.
//!
//! - [`a2a`] - task JSON-RPC at `/a2a` (blocking send, SSE streaming,
//!   task introspection/cancel/resubscribe)
//! - [`mcp`] - tool JSON-RPC at `/mcp`
//! - [`rest`] - signing page, payment page, and verification REST API
//! - [`chat`] - OpenAI-compatible `/v1/chat/completions`
//! - [`discovery`] - static well-known documents

use crate::config::Config;
use crate::events::EventBus;
use crate::facilitator::FacilitatorClient;
use crate::llm::SkillRouter;
use crate::skills::SkillCore;
use crate::store::{ChatStore, PaymentStore, TaskStore};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod a2a;
pub mod chat;
pub mod discovery;
pub mod mcp;
pub mod rest;

/// Shared state handed to every adapter
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub core: SkillCore,
    pub tasks: TaskStore,
    pub payments: PaymentStore,
    pub chats: ChatStore,
    pub events: EventBus,
    pub facilitator: FacilitatorClient,
    /// Absent when no LLM provider is configured; text routing is then
    /// rejected with a pointer at data parts
    pub router: Option<SkillRouter>,
}

/// Assemble the full HTTP surface
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/a2a", post(a2a::handle))
        .route("/mcp", post(mcp::handle))
        .route("/v1/chat/completions", post(chat::handle))
        .route("/health", get(rest::health))
        .route("/api/signing/{id}", get(rest::signing_session))
        .route("/api/signing/{id}/prepare", post(rest::signing_prepare))
        .route("/api/signing/callback/{id}", post(rest::signing_callback))
        .route("/api/payment/{id}", get(rest::payment_details))
        .route("/api/payment/confirm/{id}", post(rest::payment_confirm))
        .route("/api/payment/sign/{id}", post(rest::payment_sign))
        .route("/api/v1/session/{id}", get(rest::session_introspect))
        .route("/api/v1/verify/{proof_id}", get(rest::verify_page_data))
        .route("/api/v1/attestation/{proof_id}", get(rest::attestation_data))
        .route("/.well-known/agent-card.json", get(discovery::agent_card))
        .route("/.well-known/agent.json", get(discovery::agent_card_legacy))
        .route("/.well-known/tee.json", get(discovery::tee_metadata))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::config::{PaymentMode, TeeMode};
    use crate::kv::{Kv, MemoryKv};
    use crate::store::{ProofCache, ProofStore, RateLimiter, SessionStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;

    pub(crate) struct TestProver;

    #[async_trait]
    impl crate::prover::Prover for TestProver {
        async fn prove(
            &self,
            _: &str,
            _: &Value,
            _: &str,
        ) -> crate::Result<crate::prover::ProverOutput> {
            Ok(crate::prover::ProverOutput {
                proof: format!("0x{}", "ab".repeat(128)),
                public_inputs: vec![format!("0x{}{}", "22".repeat(32), "33".repeat(32))],
                attestation_doc: None,
            })
        }
        async fn attest(&self, _: &str) -> crate::Result<Option<String>> {
            Ok(None)
        }
        fn supports_attestation(&self) -> bool {
            false
        }
    }

    pub(crate) struct TestWitness;

    #[async_trait]
    impl crate::witness::WitnessSource for TestWitness {
        async fn build(&self, _: &crate::witness::WitnessRequest) -> crate::Result<Value> {
            Ok(serde_json::json!({"witness": []}))
        }
    }

    pub(crate) fn test_config(payment_mode: PaymentMode) -> Arc<Config> {
        Arc::new(Config {
            port: 0,
            external_base_url: "http://localhost:8080".to_string(),
            redis_url: String::new(),
            rpc_urls: HashMap::new(),
            circuits_dir: ".".to_string(),
            operator_key: Some(
                crate::crypto::parse_operator_key(
                    "0x0101010101010101010101010101010101010101010101010101010101010101",
                )
                .unwrap(),
            ),
            facilitator_url: String::new(),
            price: "$0.10".to_string(),
            payment_mode,
            tee_mode: TeeMode::Disabled,
            enclave_addr: String::new(),
            attestation_enabled: false,
            session_ttl: Duration::from_secs(600),
            attestation_max_age: Duration::from_secs(3600),
            expected_pcrs: Default::default(),
            witness_builder_url: String::new(),
            llm: None,
            rate_limit_capacity: 100,
            rate_limit_window: Duration::from_secs(60),
        })
    }

    pub(crate) fn test_state() -> AppState {
        test_state_with(PaymentMode::Disabled)
    }

    pub(crate) fn test_state_with(payment_mode: PaymentMode) -> AppState {
        let config = test_config(payment_mode);
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let core = SkillCore::new(
            config.clone(),
            SessionStore::new(kv.clone(), config.session_ttl),
            ProofStore::new(kv.clone()),
            ProofCache::new(kv.clone()),
            RateLimiter::new(kv.clone(), 100, Duration::from_secs(60)),
            Arc::new(TestProver),
            Arc::new(TestWitness),
            Arc::new(ChainClient::new(HashMap::new(), None)),
        );
        AppState {
            config,
            core,
            tasks: TaskStore::new(kv.clone()),
            payments: PaymentStore::new(kv.clone()),
            chats: ChatStore::new(kv.clone()),
            events: EventBus::new(),
            facilitator: FacilitatorClient::new("http://localhost:0").unwrap(),
            router: None,
        }
    }

    #[tokio::test]
    async fn test_router_serves_health() {
        use tower::ServiceExt;

        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_router_serves_discovery_documents() {
        use tower::ServiceExt;

        for path in [
            "/.well-known/agent-card.json",
            "/.well-known/agent.json",
            "/.well-known/tee.json",
        ] {
            let app = build_router(test_state());
            let response = app
                .oneshot(
                    axum::http::Request::builder()
                        .uri(path)
                        .body(axum::body::Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), axum::http::StatusCode::OK, "{}", path);
        }
    }
}
