//! Service configuration
//!
//! Everything is driven by environment variables; [`Config::from_env`]
//! validates up front so startup fails loudly instead of limping into the
//! first request. The parsed config is shared read-only across workers and
//! adapters.

use crate::crypto::parse_operator_key;
use crate::enclave::attestation::ExpectedPcrs;
use crate::types::ChainConfig;
use crate::{ProofportError, Result};
use k256::ecdsa::SigningKey;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Payment enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    Disabled,
    Testnet,
    Mainnet,
}

impl PaymentMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "disabled" => Ok(Self::Disabled),
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(ProofportError::config(format!(
                "PAYMENT_MODE must be disabled|testnet|mainnet, got {}",
                other
            ))),
        }
    }

    /// Whether proof generation is gated on payment
    pub fn required(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

/// Trusted-execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeeMode {
    Disabled,
    Local,
    EnclaveHw,
}

impl TeeMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "disabled" => Ok(Self::Disabled),
            "local" => Ok(Self::Local),
            "enclave-hw" => Ok(Self::EnclaveHw),
            other => Err(ProofportError::config(format!(
                "TEE_MODE must be disabled|local|enclave-hw, got {}",
                other
            ))),
        }
    }

    /// Whether the enclave transport is in use
    pub fn uses_enclave(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Local => "local",
            Self::EnclaveHw => "enclave-hw",
        }
    }
}

/// LLM provider settings; absent when no key is configured
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Parsed service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Public base URL used to mint signing/payment/verify links
    pub external_base_url: String,
    pub redis_url: String,
    /// RPC endpoint per chain id
    pub rpc_urls: HashMap<u64, String>,
    pub circuits_dir: String,
    pub operator_key: Option<SigningKey>,
    pub facilitator_url: String,
    /// Display price, e.g. "$0.10"
    pub price: String,
    pub payment_mode: PaymentMode,
    pub tee_mode: TeeMode,
    pub enclave_addr: String,
    pub attestation_enabled: bool,
    pub session_ttl: Duration,
    pub attestation_max_age: Duration,
    pub expected_pcrs: ExpectedPcrs,
    pub witness_builder_url: String,
    pub llm: Option<LlmConfig>,
    pub rate_limit_capacity: u64,
    pub rate_limit_window: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_pcr(key: &str) -> Result<Option<Vec<u8>>> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => {
            let bytes = hex::decode(raw.trim_start_matches("0x"))
                .map_err(|_| ProofportError::config(format!("{} is not valid hex", key)))?;
            Ok(Some(bytes))
        }
        _ => Ok(None),
    }
}

impl Config {
    /// Load and validate configuration from the environment
    pub fn from_env() -> Result<Self> {
        let port = env_or("PORT", "8080")
            .parse()
            .map_err(|_| ProofportError::config("PORT is not a number"))?;
        let external_base_url = env_or("EXTERNAL_BASE_URL", "http://localhost:8080")
            .trim_end_matches('/')
            .to_string();
        let redis_url = env_or("REDIS_URL", "redis://localhost:6379");

        let mut rpc_urls = HashMap::new();
        rpc_urls.insert(8453, env_or("BASE_RPC_URL", "https://mainnet.base.org"));
        rpc_urls.insert(
            84532,
            env_or("BASE_SEPOLIA_RPC_URL", "https://sepolia.base.org"),
        );

        let payment_mode = PaymentMode::parse(&env_or("PAYMENT_MODE", "disabled"))?;
        let tee_mode = TeeMode::parse(&env_or("TEE_MODE", "disabled"))?;

        let operator_key = match std::env::var("OPERATOR_PRIVATE_KEY") {
            Ok(raw) if !raw.is_empty() => Some(parse_operator_key(&raw)?),
            _ => None,
        };
        if payment_mode.required() && operator_key.is_none() {
            return Err(ProofportError::config(
                "OPERATOR_PRIVATE_KEY is required when PAYMENT_MODE is not disabled",
            ));
        }

        let price = env_or("PROOF_PRICE", "$0.10");
        // Fail early on an unparseable price rather than at first settlement
        parse_display_amount(&price)?;

        let session_ttl_secs: u64 = env_or("SESSION_TTL_SECONDS", "600")
            .parse()
            .map_err(|_| ProofportError::config("SESSION_TTL_SECONDS is not a number"))?;
        let attestation_max_age_secs: u64 = env_or("ATTESTATION_MAX_AGE_SECONDS", "3600")
            .parse()
            .map_err(|_| ProofportError::config("ATTESTATION_MAX_AGE_SECONDS is not a number"))?;

        let llm = match std::env::var("LLM_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Some(LlmConfig {
                api_key,
                base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("LLM_MODEL", "gpt-4o-mini"),
            }),
            _ => None,
        };

        let rate_limit_capacity: u64 = env_or("RATE_LIMIT_CAPACITY", "10")
            .parse()
            .map_err(|_| ProofportError::config("RATE_LIMIT_CAPACITY is not a number"))?;
        let rate_limit_window_secs: u64 = env_or("RATE_LIMIT_WINDOW_SECONDS", "60")
            .parse()
            .map_err(|_| ProofportError::config("RATE_LIMIT_WINDOW_SECONDS is not a number"))?;

        Ok(Self {
            port,
            external_base_url,
            redis_url,
            rpc_urls,
            circuits_dir: env_or("CIRCUITS_DIR", "./circuits"),
            operator_key,
            facilitator_url: env_or("FACILITATOR_URL", "https://x402.org/facilitator"),
            price,
            payment_mode,
            tee_mode,
            enclave_addr: env_or("ENCLAVE_ADDR", "127.0.0.1:7777"),
            attestation_enabled: env_or("ATTESTATION_ENABLED", "false") == "true",
            session_ttl: Duration::from_secs(session_ttl_secs),
            attestation_max_age: Duration::from_secs(attestation_max_age_secs),
            expected_pcrs: ExpectedPcrs {
                pcr0: parse_pcr("EXPECTED_PCR0")?,
                pcr1: parse_pcr("EXPECTED_PCR1")?,
                pcr2: parse_pcr("EXPECTED_PCR2")?,
            },
            witness_builder_url: env_or("WITNESS_BUILDER_URL", "http://localhost:8090"),
            llm,
            rate_limit_capacity,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
        })
    }

    /// The chain payments settle on, per payment mode
    pub fn payment_chain(&self) -> ChainConfig {
        match self.payment_mode {
            PaymentMode::Mainnet => ChainConfig::base_mainnet(),
            _ => ChainConfig::base_sepolia(),
        }
    }

    /// The default chain for verification lookups
    pub fn default_chain_id(&self) -> u64 {
        self.payment_chain().chain_id
    }

    /// Signing-page URL for a session
    pub fn signing_url(&self, request_id: &str) -> String {
        format!("{}/s/{}", self.external_base_url, request_id)
    }

    /// Payment-page URL for a session
    pub fn payment_url(&self, request_id: &str) -> String {
        format!("{}/pay/{}", self.external_base_url, request_id)
    }

    /// Verification-page URL for a proof
    pub fn verify_url(&self, proof_id: &str) -> String {
        format!("{}/verify/{}", self.external_base_url, proof_id)
    }
}

/// Parse a display amount like `"$0.10"` into atomic units (6 decimals)
pub fn parse_display_amount(display: &str) -> Result<u128> {
    let trimmed = display.trim().trim_start_matches('$');
    let amount = Decimal::from_str(trimmed)
        .map_err(|_| ProofportError::config(format!("unparseable amount {}", display)))?;
    let units = amount * Decimal::from(1_000_000u64);
    if units.fract() != Decimal::ZERO || units.is_sign_negative() {
        return Err(ProofportError::config(format!(
            "amount {} does not map to whole units",
            display
        )));
    }
    use rust_decimal::prelude::ToPrimitive;
    units
        .to_u128()
        .ok_or_else(|| ProofportError::config(format!("amount {} out of range", display)))
}
