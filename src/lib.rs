//! # proofport
//!
//! An agent-facing zero-knowledge proof service. External agents (LLM
//! tool-callers, automated agents, plain REST clients) drive a multi-step
//! flow that issues ZK proofs binding an off-chain identity attestation to
//! a fresh public nullifier, settles an x402 micropayment, and returns a
//! verifiable artifact.
//!
//! This crate is the coordination plane: the session state machine, the
//! request–payment–proof flow across four protocol surfaces, the
//! background workers that move state forward, and the typed stores over
//! the shared KV store that glue them together. The prover itself, the
//! on-chain verifier contracts, the witness builder, and the payment
//! facilitator are external collaborators consumed through typed clients.
//!
//! ## Architecture
//!
//! - **`skills`**: the six canonical operations (request_signing,
//!   check_status, request_payment, generate_proof, verify_proof,
//!   get_supported_circuits) - the single source of truth
//! - **`adapters`**: four thin protocol surfaces (task JSON-RPC, tool
//!   JSON-RPC, REST, chat completions) plus discovery documents
//! - **`worker`**: the task-queue worker and the payment settlement worker
//! - **`store`** / **`kv`**: typed stores over a `Kv` trait (Redis in
//!   production, in-memory in tests)
//! - **`enclave`**: framed transport to the isolated prover and
//!   attestation envelope verification
//! - **`chain`**: verifier `eth_call`s and signed ERC-20 settlement
//!   transactions
//! - **`llm`**: provider trait, OpenAI-compatible client, skill router
//!
//! ## Flow
//!
//! A caller invokes a protocol adapter; the adapter parses and validates,
//! then either dispatches synchronously into the skill core or creates a
//! task for the worker to pick up. The core reads and writes the session
//! store and emits events; SSE subscribers observe task progress through
//! the event bus.

pub mod adapters;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod enclave;
pub mod error;
pub mod events;
pub mod facilitator;
pub mod jsonrpc;
pub mod kv;
pub mod llm;
pub mod outcome;
pub mod prover;
pub mod skills;
pub mod store;
pub mod types;
pub mod witness;
pub mod worker;

// Re-exports for convenience
pub use config::Config;
pub use error::{ProofportError, Result};
pub use skills::{Skill, SkillCore};

/// Current version of the proofport crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
