//! The six canonical skills
//!
//! This module is the single source of truth for the service's behavior;
//! every protocol adapter (task JSON-RPC, tool JSON-RPC, REST, chat
//! completions) dispatches into the same implementations here.
//!
//! Skills are a closed set modeled as the [`Skill`] enum; adapters hold the
//! string → variant parse and the core stays fully typed. Each operation
//! takes a typed params record and returns a typed result record; failures
//! are typed errors per the crate error taxonomy. All operations are
//! idempotent on their inputs except `generate_proof`, which consumes its
//! session on success.
//!
//! - [`signing`] - request_signing, check_status, request_payment
//! - [`proving`] - generate_proof
//! - [`verify`] - verify_proof, get_supported_circuits

use crate::chain::ChainClient;
use crate::config::Config;
use crate::prover::Prover;
use crate::store::{ProofCache, ProofStore, RateLimiter, SessionStore};
use crate::witness::WitnessSource;
use crate::{ProofportError, Result};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

pub mod proving;
pub mod signing;
pub mod verify;

#[cfg(test)]
mod tests;

pub use proving::{GenerateProofParams, GenerateProofResult};
pub use signing::{
    CheckStatusParams, CheckStatusResult, RequestPaymentParams, RequestPaymentResult,
    RequestSigningParams, RequestSigningResult,
};
pub use verify::{
    GetSupportedCircuitsParams, GetSupportedCircuitsResult, VerifyProofParams, VerifyProofResult,
};

/// The closed set of skills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Skill {
    RequestSigning,
    CheckStatus,
    RequestPayment,
    GenerateProof,
    VerifyProof,
    GetSupportedCircuits,
}

/// Every skill, in presentation order
pub const ALL_SKILLS: [Skill; 6] = [
    Skill::RequestSigning,
    Skill::CheckStatus,
    Skill::RequestPayment,
    Skill::GenerateProof,
    Skill::VerifyProof,
    Skill::GetSupportedCircuits,
];

impl Skill {
    /// Wire name of the skill
    pub fn as_str(&self) -> &'static str {
        match self {
            Skill::RequestSigning => "request_signing",
            Skill::CheckStatus => "check_status",
            Skill::RequestPayment => "request_payment",
            Skill::GenerateProof => "generate_proof",
            Skill::VerifyProof => "verify_proof",
            Skill::GetSupportedCircuits => "get_supported_circuits",
        }
    }

    /// One-line description surfaced in discovery documents and tool lists
    pub fn description(&self) -> &'static str {
        match self {
            Skill::RequestSigning => {
                "Start a proof session: returns a signing URL the wallet holder opens to sign"
            }
            Skill::CheckStatus => {
                "Report the current phase of a proof session (signing, payment, ready, expired)"
            }
            Skill::RequestPayment => "Return the payment URL and price for a signed session",
            Skill::GenerateProof => {
                "Generate a zero-knowledge proof for a completed (and, if required, paid) session"
            }
            Skill::VerifyProof => "Verify a proof against the on-chain verifier contract",
            Skill::GetSupportedCircuits => "List the supported circuits and their verifier deployments",
        }
    }

    /// Whether invoking this skill produces a proof (the chat router allows
    /// at most one such call per request)
    pub fn is_proof_producing(&self) -> bool {
        matches!(self, Skill::GenerateProof)
    }
}

impl FromStr for Skill {
    type Err = ProofportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "request_signing" => Ok(Skill::RequestSigning),
            "check_status" => Ok(Skill::CheckStatus),
            "request_payment" => Ok(Skill::RequestPayment),
            "generate_proof" => Ok(Skill::GenerateProof),
            "verify_proof" => Ok(Skill::VerifyProof),
            "get_supported_circuits" => Ok(Skill::GetSupportedCircuits),
            other => Err(ProofportError::invalid_params(format!(
                "unknown skill {}; valid skills are request_signing, check_status, \
                 request_payment, generate_proof, verify_proof, get_supported_circuits",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical skill implementations and their shared dependencies
#[derive(Clone)]
pub struct SkillCore {
    pub(crate) config: Arc<Config>,
    pub(crate) sessions: SessionStore,
    pub(crate) proofs: ProofStore,
    pub(crate) cache: ProofCache,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) prover: Arc<dyn Prover>,
    pub(crate) witness: Arc<dyn WitnessSource>,
    pub(crate) chain: Arc<ChainClient>,
}

impl SkillCore {
    /// Assemble the core from its dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        sessions: SessionStore,
        proofs: ProofStore,
        cache: ProofCache,
        rate_limiter: RateLimiter,
        prover: Arc<dyn Prover>,
        witness: Arc<dyn WitnessSource>,
        chain: Arc<ChainClient>,
    ) -> Self {
        Self {
            config,
            sessions,
            proofs,
            cache,
            rate_limiter,
            prover,
            witness,
            chain,
        }
    }

    /// The shared configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session store (exposed for the signing/payment REST endpoints)
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The proof result store (exposed for the verification REST endpoints)
    pub fn proofs(&self) -> &ProofStore {
        &self.proofs
    }

    /// Adapter entry point: invoke a skill with untyped params
    pub async fn dispatch(&self, skill: Skill, params: Value) -> Result<Value> {
        fn parse<T: serde::de::DeserializeOwned>(skill: Skill, params: Value) -> Result<T> {
            serde_json::from_value(params).map_err(|e| {
                ProofportError::invalid_params(format!("invalid {} params: {}", skill, e))
            })
        }

        tracing::debug!(skill = %skill, "dispatching skill");
        let result = match skill {
            Skill::RequestSigning => {
                serde_json::to_value(self.request_signing(parse(skill, params)?).await?)?
            }
            Skill::CheckStatus => {
                serde_json::to_value(self.check_status(parse(skill, params)?).await?)?
            }
            Skill::RequestPayment => {
                serde_json::to_value(self.request_payment(parse(skill, params)?).await?)?
            }
            Skill::GenerateProof => {
                serde_json::to_value(self.generate_proof(parse(skill, params)?).await?)?
            }
            Skill::VerifyProof => {
                serde_json::to_value(self.verify_proof(parse(skill, params)?).await?)?
            }
            Skill::GetSupportedCircuits => {
                serde_json::to_value(self.get_supported_circuits(parse(skill, params)?).await?)?
            }
        };
        Ok(result)
    }
}
