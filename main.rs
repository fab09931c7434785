//! Proofport server
//!
//! Loads configuration from the environment, connects the KV store, wires
//! the skill core and protocol adapters, spawns the background workers,
//! and serves HTTP until interrupted. Startup failures (missing required
//! config, unreachable Redis, invalid operator key for an enabled payment
//! mode) exit non-zero before the listener opens.

use proofport::adapters::{build_router, AppState};
use proofport::chain::ChainClient;
use proofport::config::{Config, TeeMode};
use proofport::enclave::EnclaveTransport;
use proofport::events::EventBus;
use proofport::facilitator::FacilitatorClient;
use proofport::kv::{Kv, RedisKv};
use proofport::llm::{OpenAiProvider, SkillRouter};
use proofport::prover::{EnclaveProver, LocalBinaryProver, Prover};
use proofport::skills::SkillCore;
use proofport::store::{
    ChatStore, PaymentStore, ProofCache, ProofStore, RateLimiter, SessionStore, TaskStore,
};
use proofport::witness::HttpWitnessSource;
use proofport::worker::{SettlementWorker, TaskWorker};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proofport=info,tower_http=info".into()),
        )
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> proofport::Result<()> {
    let config = Arc::new(Config::from_env()?);
    info!(
        port = config.port,
        payment_mode = ?config.payment_mode,
        tee_mode = config.tee_mode.as_str(),
        "starting proofport v{}",
        proofport::VERSION
    );

    // KV store; unreachable Redis aborts startup
    let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&config.redis_url).await?);
    info!(redis = %config.redis_url, "KV store connected");

    let sessions = SessionStore::new(kv.clone(), config.session_ttl);
    let tasks = TaskStore::new(kv.clone());
    let proofs = ProofStore::new(kv.clone());
    let cache = ProofCache::new(kv.clone());
    let payments = PaymentStore::new(kv.clone());
    let chats = ChatStore::new(kv.clone());
    let rate_limiter = RateLimiter::new(
        kv.clone(),
        config.rate_limit_capacity,
        config.rate_limit_window,
    );

    let chain = Arc::new(ChainClient::new(
        config.rpc_urls.clone(),
        config.operator_key.clone(),
    ));
    let facilitator = FacilitatorClient::new(&config.facilitator_url)?;
    let witness = Arc::new(HttpWitnessSource::new(&config.witness_builder_url)?);

    let prover: Arc<dyn Prover> = if config.tee_mode.uses_enclave() {
        info!(addr = %config.enclave_addr, mode = config.tee_mode.as_str(), "using enclave prover");
        Arc::new(EnclaveProver::new(
            EnclaveTransport::new(&config.enclave_addr),
            config.tee_mode.as_str(),
        ))
    } else {
        info!(dir = %config.circuits_dir, "using local prover binaries");
        Arc::new(LocalBinaryProver::new(&config.circuits_dir))
    };

    let core = SkillCore::new(
        config.clone(),
        sessions,
        proofs,
        cache,
        rate_limiter,
        prover,
        witness,
        chain.clone(),
    );

    let router = match &config.llm {
        Some(llm) => {
            info!(model = %llm.model, "LLM router enabled");
            Some(SkillRouter::new(
                Arc::new(OpenAiProvider::new(&llm.base_url, &llm.api_key, &llm.model)?),
                core.clone(),
            ))
        }
        None => {
            info!("no LLM configured; text routing disabled");
            None
        }
    };

    let events = EventBus::new();
    let state = AppState {
        config: config.clone(),
        core: core.clone(),
        tasks: tasks.clone(),
        payments: payments.clone(),
        chats,
        events: events.clone(),
        facilitator,
        router,
    };

    // Background workers with cooperative shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task_worker = TaskWorker::new(tasks, core, events);
    let task_handle = tokio::spawn(task_worker.run(shutdown_rx.clone()));

    let settlement_handle = if config.payment_mode.required() {
        let worker = SettlementWorker::new(payments, chain, config.clone());
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        info!("payment disabled; settlement worker not started");
        None
    };

    if config.tee_mode == TeeMode::EnclaveHw && config.expected_pcrs.pcr0.is_none() {
        tracing::warn!("enclave-hw mode without EXPECTED_PCR0; attestations are not pinned");
    }

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| proofport::ProofportError::config(format!("failed to bind {}: {}", addr, e)))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| proofport::ProofportError::internal(format!("server error: {}", e)))?;

    // Drain workers
    let _ = shutdown_tx.send(true);
    let _ = task_handle.await;
    if let Some(handle) = settlement_handle {
        let _ = handle.await;
    }
    info!("bye");
    Ok(())
}
