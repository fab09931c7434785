//! End-to-end tests for the skill core

use super::*;
use crate::chain::ChainClient;
use crate::config::{Config, PaymentMode, TeeMode};
use crate::crypto;
use crate::enclave::EnclaveTransport;
use crate::kv::{Kv, MemoryKv};
use crate::prover::{EnclaveProver, Prover, ProverOutput};
use crate::store::{ProofCache, ProofStore, RateLimiter, SessionStore};
use crate::witness::{WitnessRequest, WitnessSource};
use crate::ProofportError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADDRESS: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01";

fn signature() -> String {
    format!("0x{}", "11".repeat(65))
}

fn test_config(payment_mode: PaymentMode) -> Arc<Config> {
    Arc::new(Config {
        port: 0,
        external_base_url: "http://localhost:8080".to_string(),
        redis_url: String::new(),
        rpc_urls: HashMap::new(),
        circuits_dir: ".".to_string(),
        operator_key: None,
        facilitator_url: String::new(),
        price: "$0.10".to_string(),
        payment_mode,
        tee_mode: TeeMode::Local,
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

/// Prover double: fixed proof bytes, a concatenated public-inputs blob, and
/// a call counter
struct MockProver {
    calls: AtomicU32,
    attach_attestation: bool,
}

impl MockProver {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            attach_attestation: false,
        }
    }

    fn with_attestation() -> Self {
        Self {
            calls: AtomicU32::new(0),
            attach_attestation: true,
        }
    }
}

#[async_trait]
impl Prover for MockProver {
    async fn prove(&self, _circuit_id: &str, _input: &Value, _request_id: &str) -> crate::Result<ProverOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProverOutput {
            proof: format!("0x{}", "ab".repeat(128)),
            // One concatenated blob: nullifier word then signal word
            public_inputs: vec![format!("0x{}{}", "22".repeat(32), "33".repeat(32))],
            attestation_doc: self.attach_attestation.then(|| "ZmFrZS1hdHQ=".to_string()),
        })
    }

    async fn attest(&self, _proof_hash: &str) -> crate::Result<Option<String>> {
        Ok(Some("c3RhbmRhbG9uZQ==".to_string()))
    }

    fn supports_attestation(&self) -> bool {
        true
    }
}

struct MockWitness;

#[async_trait]
impl WitnessSource for MockWitness {
    async fn build(&self, request: &WitnessRequest) -> crate::Result<Value> {
        Ok(json!({ "circuit": request.circuit_id, "signalHash": request.signal_hash }))
    }
}

struct FailingWitness;

#[async_trait]
impl WitnessSource for FailingWitness {
    async fn build(&self, _request: &WitnessRequest) -> crate::Result<Value> {
        Err(ProofportError::dependency("attestation source down"))
    }
}

struct CoreBuilder {
    config: Arc<Config>,
    prover: Arc<dyn Prover>,
    witness: Arc<dyn WitnessSource>,
    chain: Arc<ChainClient>,
    rate_capacity: u64,
}

impl CoreBuilder {
    fn new(payment_mode: PaymentMode) -> Self {
        Self {
            config: test_config(payment_mode),
            prover: Arc::new(MockProver::new()),
            witness: Arc::new(MockWitness),
            chain: Arc::new(ChainClient::new(HashMap::new(), None)),
            rate_capacity: 100,
        }
    }

    fn prover(mut self, prover: Arc<dyn Prover>) -> Self {
        self.prover = prover;
        self
    }

    fn witness(mut self, witness: Arc<dyn WitnessSource>) -> Self {
        self.witness = witness;
        self
    }

    fn chain(mut self, chain: Arc<ChainClient>) -> Self {
        self.chain = chain;
        self
    }

    fn rate_capacity(mut self, capacity: u64) -> Self {
        self.rate_capacity = capacity;
        self
    }

    fn build(self) -> SkillCore {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        SkillCore::new(
            self.config.clone(),
            SessionStore::new(kv.clone(), self.config.session_ttl),
            ProofStore::new(kv.clone()),
            ProofCache::new(kv.clone()),
            RateLimiter::new(kv.clone(), self.rate_capacity, Duration::from_secs(60)),
            self.prover,
            self.witness,
            self.chain,
        )
    }
}

/// Drive a session through the signing page to completion
async fn sign_session(core: &SkillCore, request_id: &str) -> String {
    let signal_hash = core.prepare_session(request_id, ADDRESS).await.unwrap();
    core.complete_session_signing(request_id, ADDRESS, &signature())
        .await
        .unwrap();
    signal_hash
}

#[tokio::test]
async fn test_happy_path_session_flow() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();

    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();
    assert!(signing.signing_url.ends_with(&format!("/s/{}", signing.request_id)));

    // Prepare returns the keccak binding of (address, scope, circuit)
    let signal_hash = sign_session(&core, &signing.request_id).await;
    let expected =
        crypto::to_hex32(crypto::signal_hash(ADDRESS, "app.example", "coinbase_attestation").unwrap());
    assert_eq!(signal_hash, expected);

    let result = core
        .generate_proof(GenerateProofParams {
            request_id: Some(signing.request_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!result.proof_id.is_empty());
    assert!(result.verify_url.ends_with(&result.proof_id));
    assert!(!result.cached);
    assert_eq!(result.signal_hash, expected);
    // The concatenated blob was normalized into two 32-byte words
    assert_eq!(result.public_inputs.len(), 2);
    assert_eq!(result.nullifier, format!("0x{}", "22".repeat(32)));

    // The session is consumed
    assert!(core.sessions.get(&signing.request_id).await.unwrap().is_none());
    // The proof result is durable
    assert!(core.proofs.get(&result.proof_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cache_hit_returns_equal_proof_with_fresh_id() {
    let prover = Arc::new(MockProver::new());
    let core = CoreBuilder::new(PaymentMode::Disabled)
        .prover(prover.clone())
        .build();

    let mut results = Vec::new();
    for _ in 0..2 {
        let signing = core
            .request_signing(RequestSigningParams {
                circuit_id: "coinbase_attestation".to_string(),
                scope: "app.example".to_string(),
                country_list: None,
                is_included: None,
            })
            .await
            .unwrap();
        sign_session(&core, &signing.request_id).await;
        let result = core
            .generate_proof(GenerateProofParams {
                request_id: Some(signing.request_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        // Either way the session is consumed
        assert!(core.sessions.get(&signing.request_id).await.unwrap().is_none());
        results.push(result);
    }

    assert!(!results[0].cached);
    assert!(results[1].cached);
    assert_eq!(results[0].proof, results[1].proof);
    assert_eq!(results[0].public_inputs, results[1].public_inputs);
    assert_ne!(results[0].proof_id, results[1].proof_id);
    // The prover ran exactly once
    assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_payment_required_path() {
    let core = CoreBuilder::new(PaymentMode::Testnet).build();

    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();
    sign_session(&core, &signing.request_id).await;

    // Signed but unpaid: phase is payment
    let status = core
        .check_status(CheckStatusParams {
            request_id: signing.request_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(status.phase, crate::types::SessionPhase::Payment);

    // Proof generation is gated
    let err = core
        .generate_proof(GenerateProofParams {
            request_id: Some(signing.request_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::InvalidParams(_)));

    let payment = core
        .request_payment(RequestPaymentParams {
            request_id: signing.request_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(payment.amount, "$0.10");
    assert_eq!(payment.network, "base-sepolia");

    // Idempotent: same URL, payment status still pending
    let again = core
        .request_payment(RequestPaymentParams {
            request_id: signing.request_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(payment.payment_url, again.payment_url);

    core.confirm_session_payment(&signing.request_id, "0xTX")
        .await
        .unwrap();

    let status = core
        .check_status(CheckStatusParams {
            request_id: signing.request_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(status.phase, crate::types::SessionPhase::Ready);
    assert!(status.circuit.is_some());

    let result = core
        .generate_proof(GenerateProofParams {
            request_id: Some(signing.request_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.payment_tx_hash.as_deref(), Some("0xTX"));
}

#[tokio::test]
async fn test_direct_mode_only_without_payment() {
    // With payment enabled, direct mode is rejected
    let paid = CoreBuilder::new(PaymentMode::Testnet).build();
    let err = paid
        .generate_proof(GenerateProofParams {
            address: Some(ADDRESS.to_string()),
            signature: Some(signature()),
            scope: Some("app.example".to_string()),
            circuit_id: Some("coinbase_attestation".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::InvalidParams(_)));

    // Without payment it succeeds
    let free = CoreBuilder::new(PaymentMode::Disabled).build();
    let result = free
        .generate_proof(GenerateProofParams {
            address: Some(ADDRESS.to_string()),
            signature: Some(signature()),
            scope: Some("app.example".to_string()),
            circuit_id: Some("coinbase_attestation".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!result.proof_id.is_empty());
}

#[tokio::test]
async fn test_failed_generation_leaves_session_intact() {
    let core = CoreBuilder::new(PaymentMode::Disabled)
        .witness(Arc::new(FailingWitness))
        .build();

    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();
    sign_session(&core, &signing.request_id).await;

    let err = core
        .generate_proof(GenerateProofParams {
            request_id: Some(signing.request_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::Dependency(_)));

    // The caller can retry without re-signing
    let session = core.sessions.get(&signing.request_id).await.unwrap().unwrap();
    assert_eq!(session.status, crate::types::SessionStatus::Completed);
}

#[tokio::test]
async fn test_enclave_retry_exhaustion_preserves_session() {
    // A bound-then-dropped listener guarantees connection refused
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let transport = EnclaveTransport::new(addr)
        .with_backoff_base(Duration::from_millis(2))
        .with_attempt_timeout(Duration::from_millis(200));
    let core = CoreBuilder::new(PaymentMode::Disabled)
        .prover(Arc::new(EnclaveProver::new(transport, "local")))
        .build();

    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();
    sign_session(&core, &signing.request_id).await;

    let err = core
        .generate_proof(GenerateProofParams {
            request_id: Some(signing.request_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::Dependency(_)));
    assert!(err.to_string().contains("enclave"));

    // The session survives the outage
    assert!(core.sessions.get(&signing.request_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rate_limit_denies_with_retry_after() {
    let core = CoreBuilder::new(PaymentMode::Disabled).rate_capacity(1).build();

    let direct = |_: u32| GenerateProofParams {
        address: Some(ADDRESS.to_string()),
        signature: Some(signature()),
        scope: Some("app.example".to_string()),
        circuit_id: Some("coinbase_attestation".to_string()),
        ..Default::default()
    };

    core.generate_proof(direct(0)).await.unwrap();
    // The second call is over capacity even though the first was a cache
    // write: admission happens before the cache lookup.
    let err = core.generate_proof(direct(1)).await.unwrap_err();
    match err {
        ProofportError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_country_circuit_validation() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();

    let err = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_country_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("countryList"));

    let err = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_country_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: Some(vec!["US".to_string(), "DE".to_string()]),
            is_included: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("isIncluded"));

    let ok = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_country_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: Some(vec!["US".to_string(), "DE".to_string()]),
            is_included: Some(true),
        })
        .await
        .unwrap();
    let session = core.sessions.get(&ok.request_id).await.unwrap().unwrap();
    assert_eq!(session.country_list.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_circuit_names_remedy() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let err = core
        .request_signing(RequestSigningParams {
            circuit_id: "nope".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("get_supported_circuits"));
}

#[tokio::test]
async fn test_check_status_has_no_side_effects() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();

    let before = core.sessions.get(&signing.request_id).await.unwrap().unwrap();
    for _ in 0..3 {
        core.check_status(CheckStatusParams {
            request_id: signing.request_id.clone(),
        })
        .await
        .unwrap();
    }
    let after = core.sessions.get(&signing.request_id).await.unwrap().unwrap();
    assert_eq!(serde_json::to_value(&before).unwrap(), serde_json::to_value(&after).unwrap());
}

#[tokio::test]
async fn test_signing_page_rejects_address_switch() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let signing = core
        .request_signing(RequestSigningParams {
            circuit_id: "coinbase_attestation".to_string(),
            scope: "app.example".to_string(),
            country_list: None,
            is_included: None,
        })
        .await
        .unwrap();

    core.prepare_session(&signing.request_id, ADDRESS).await.unwrap();
    let other = "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB02";
    assert!(core.prepare_session(&signing.request_id, other).await.is_err());
    assert!(core
        .complete_session_signing(&signing.request_id, other, &signature())
        .await
        .is_err());

    // Completed sessions accept no further signatures
    core.complete_session_signing(&signing.request_id, ADDRESS, &signature())
        .await
        .unwrap();
    assert!(core
        .complete_session_signing(&signing.request_id, ADDRESS, &signature())
        .await
        .is_err());
}

#[tokio::test]
async fn test_verify_proof_revert_is_valid_false() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": 3, "message": "execution reverted: pairing check failed" },
            })
            .to_string(),
        )
        .create_async()
        .await;

    let mut urls = HashMap::new();
    urls.insert(84532u64, server.url());
    let core = CoreBuilder::new(PaymentMode::Disabled)
        .chain(Arc::new(ChainClient::new(urls, None)))
        .build();

    let result = core
        .verify_proof(VerifyProofParams {
            circuit_id: Some("coinbase_attestation".to_string()),
            proof: Some(format!("0x{}", "00".repeat(64))),
            public_inputs: Some(vec![format!("0x{}", "11".repeat(32))]),
            chain_id: Some(84532),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!result.valid);
    assert!(result.error.unwrap().contains("reverted"));
    assert_eq!(result.chain_id, 84532);
}

#[tokio::test]
async fn test_verify_fresh_proof_by_id_uses_normalized_inputs() {
    // The mock prover emits one concatenated blob; a fresh proof verified
    // by id must reach the verifier as two separate 32-byte words. The
    // mock only matches the calldata built from the normalized form, so a
    // non-normalized call would miss it and fail the test.
    let proof_bytes = hex::decode("ab".repeat(128)).unwrap();
    let expected_words = [[0x22u8; 32], [0x33u8; 32]];
    let expected_data = format!(
        "0x{}",
        hex::encode(crate::chain::encode_verify_call(&proof_bytes, &expected_words))
    );

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::Regex(expected_data))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"jsonrpc": "2.0", "id": 1, "result": format!("0x{}", "00".repeat(31) + "01")})
                .to_string(),
        )
        .create_async()
        .await;

    let mut urls = HashMap::new();
    urls.insert(84532u64, server.url());
    let core = CoreBuilder::new(PaymentMode::Disabled)
        .chain(Arc::new(ChainClient::new(urls, None)))
        .build();

    let generated = core
        .generate_proof(GenerateProofParams {
            address: Some(ADDRESS.to_string()),
            signature: Some(signature()),
            scope: Some("app.example".to_string()),
            circuit_id: Some("coinbase_attestation".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(generated.public_inputs.len(), 2);

    let verified = core
        .verify_proof(VerifyProofParams {
            proof_id: Some(generated.proof_id.clone()),
            chain_id: Some(84532),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(verified.valid);
}

#[tokio::test]
async fn test_verify_unknown_proof_id_is_not_found() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let err = core
        .verify_proof(VerifyProofParams {
            proof_id: Some("missing".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::NotFound(_)));
}

#[tokio::test]
async fn test_get_supported_circuits() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let result = core
        .get_supported_circuits(GetSupportedCircuitsParams { chain_id: None })
        .await
        .unwrap();
    assert_eq!(result.chain_id, 84532);
    assert_eq!(result.circuits.len(), 2);
    assert!(result.circuits.iter().all(|c| c.verifier_address.is_some()));
    let country = result
        .circuits
        .iter()
        .find(|c| c.id == "coinbase_country_attestation")
        .unwrap();
    assert!(country.requires_country_list);
}

#[tokio::test]
async fn test_attestation_attached_by_prover_is_preserved_through_cache() {
    let mut config = (*test_config(PaymentMode::Disabled)).clone();
    config.attestation_enabled = true;
    let config = Arc::new(config);

    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let core = SkillCore::new(
        config.clone(),
        SessionStore::new(kv.clone(), config.session_ttl),
        ProofStore::new(kv.clone()),
        ProofCache::new(kv.clone()),
        RateLimiter::new(kv.clone(), 100, Duration::from_secs(60)),
        Arc::new(MockProver::with_attestation()),
        Arc::new(MockWitness),
        Arc::new(ChainClient::new(HashMap::new(), None)),
    );

    let direct = GenerateProofParams {
        address: Some(ADDRESS.to_string()),
        signature: Some(signature()),
        scope: Some("app.example".to_string()),
        circuit_id: Some("coinbase_attestation".to_string()),
        ..Default::default()
    };

    let first = core.generate_proof(direct.clone()).await.unwrap();
    let attestation = first.attestation.unwrap();
    assert_eq!(attestation.document, "ZmFrZS1hdHQ=");
    assert_eq!(attestation.mode, "local");

    let second = core.generate_proof(direct).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.attestation.unwrap().document, "ZmFrZS1hdHQ=");
}

#[tokio::test]
async fn test_dispatch_maps_bad_params_to_invalid_params() {
    let core = CoreBuilder::new(PaymentMode::Disabled).build();
    let err = core
        .dispatch(Skill::CheckStatus, json!({"nope": true}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProofportError::InvalidParams(_)));

    let ok = core
        .dispatch(Skill::GetSupportedCircuits, json!({}))
        .await
        .unwrap();
    assert!(ok["circuits"].is_array());
}
