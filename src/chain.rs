//! Chain RPC client
//!
//! Two concerns, matching the two on-chain touch points of the service:
//!
//! - **Verification** (read-only): `eth_call` into a circuit's verifier
//!   contract, `verify(bytes, bytes32[]) -> bool`. A revert is not an error
//!   of this client; it surfaces as [`VerifyOutcome::Reverted`] with the
//!   decoded reason so the caller can report `valid = false`.
//! - **Settlement** (write): an ERC-20 `transfer` from the operator wallet,
//!   encoded as a signed EIP-1559 transaction and submitted through
//!   `eth_sendRawTransaction`, followed by a receipt wait.
//!
//! Transaction assembly is deliberately plain: RLP over trimmed big-endian
//! words, keccak sighash, recoverable secp256k1 signature.

use crate::crypto::{keccak256, operator_address};
use crate::{ProofportError, Result};
use ethereum_types::{Address, H256, U256};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// ERC-677/1363-free, plain ERC-20 transfer selector
const TRANSFER_SELECTOR: &str = "transfer(address,uint256)";
/// Verifier view function selector
const VERIFY_SELECTOR: &str = "verify(bytes,bytes32[])";

/// Outcome of a verifier call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The call completed and returned a boolean
    Completed(bool),
    /// The verifier reverted; carries the stringified reason
    Reverted(String),
}

/// JSON-RPC chain client bound to one or more networks
#[derive(Clone)]
pub struct ChainClient {
    http: reqwest::Client,
    rpc_urls: HashMap<u64, String>,
    operator_key: Option<SigningKey>,
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("chains", &self.rpc_urls.keys().collect::<Vec<_>>())
            .field("operator_key", &self.operator_key.is_some())
            .finish()
    }
}

impl ChainClient {
    /// Create a client over the configured RPC endpoints
    pub fn new(rpc_urls: HashMap<u64, String>, operator_key: Option<SigningKey>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_urls,
            operator_key,
        }
    }

    /// The operator address, when an operator key is configured
    pub fn operator(&self) -> Option<Address> {
        self.operator_key.as_ref().map(operator_address)
    }

    fn rpc_url(&self, chain_id: u64) -> Result<&str> {
        self.rpc_urls
            .get(&chain_id)
            .map(String::as_str)
            .ok_or_else(|| {
                ProofportError::invalid_params(format!("no RPC endpoint for chain {}", chain_id))
            })
    }

    /// Raw JSON-RPC exchange; a JSON-RPC error object comes back as `Err`
    /// with the error value attached for the caller to interpret
    async fn rpc(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, Value>> {
        let url = self.rpc_url(chain_id)?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProofportError::dependency(format!("chain rpc {}: {}", method, e)))?;
        if !response.status().is_success() {
            return Err(ProofportError::dependency(format!(
                "chain rpc {} returned HTTP {}",
                method,
                response.status()
            )));
        }
        let envelope: Value = response.json().await?;
        if let Some(error) = envelope.get("error") {
            return Ok(Err(error.clone()));
        }
        Ok(Ok(envelope.get("result").cloned().unwrap_or(Value::Null)))
    }

    async fn rpc_ok(&self, chain_id: u64, method: &str, params: Value) -> Result<Value> {
        match self.rpc(chain_id, method, params).await? {
            Ok(result) => Ok(result),
            Err(error) => Err(ProofportError::dependency(format!(
                "chain rpc {} failed: {}",
                method, error
            ))),
        }
    }

    /// Call a circuit verifier contract
    pub async fn verify_proof(
        &self,
        chain_id: u64,
        verifier: Address,
        proof: &[u8],
        public_inputs: &[[u8; 32]],
    ) -> Result<VerifyOutcome> {
        let data = encode_verify_call(proof, public_inputs);
        let params = json!([
            { "to": format!("0x{}", hex::encode(verifier.as_bytes())), "data": format!("0x{}", hex::encode(&data)) },
            "latest"
        ]);
        match self.rpc(chain_id, "eth_call", params).await? {
            Ok(result) => {
                let raw = result.as_str().unwrap_or("0x");
                Ok(VerifyOutcome::Completed(decode_bool(raw)))
            }
            Err(error) => {
                let reason = revert_reason(&error);
                tracing::debug!(chain_id, %reason, "verifier reverted");
                Ok(VerifyOutcome::Reverted(reason))
            }
        }
    }

    /// Submit an ERC-20 transfer from the operator wallet
    pub async fn erc20_transfer(
        &self,
        chain_id: u64,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<H256> {
        let key = self
            .operator_key
            .as_ref()
            .ok_or_else(|| ProofportError::config("no operator key configured"))?;
        let from = operator_address(key);
        let data = encode_transfer_call(to, amount);

        let nonce = self
            .rpc_ok(
                chain_id,
                "eth_getTransactionCount",
                json!([format!("0x{}", hex::encode(from.as_bytes())), "pending"]),
            )
            .await
            .and_then(|v| parse_quantity(&v))?;
        let gas_price = self
            .rpc_ok(chain_id, "eth_gasPrice", json!([]))
            .await
            .and_then(|v| parse_quantity(&v))?;
        let gas = self
            .rpc_ok(
                chain_id,
                "eth_estimateGas",
                json!([{
                    "from": format!("0x{}", hex::encode(from.as_bytes())),
                    "to": format!("0x{}", hex::encode(token.as_bytes())),
                    "data": format!("0x{}", hex::encode(&data)),
                }]),
            )
            .await
            .and_then(|v| parse_quantity(&v))?;

        // Priority fee capped by the observed gas price; fee cap leaves
        // headroom for one base-fee doubling
        let tip = std::cmp::min(gas_price, U256::from(1_000_000_000u64));
        let max_fee = gas_price * U256::from(2u64);
        let gas_limit = gas + gas / U256::from(5u64);

        let raw = sign_eip1559(
            key, chain_id, nonce, tip, max_fee, gas_limit, token, U256::zero(), &data,
        )?;

        let result = self
            .rpc_ok(
                chain_id,
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| ProofportError::dependency("eth_sendRawTransaction returned no hash"))?;
        let bytes = hex::decode(hash.trim_start_matches("0x"))
            .map_err(|_| ProofportError::dependency("transaction hash is not hex"))?;
        if bytes.len() != 32 {
            return Err(ProofportError::dependency("transaction hash is not 32 bytes"));
        }
        Ok(H256::from_slice(&bytes))
    }

    /// Wait for a transaction receipt; returns the execution status
    pub async fn wait_for_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        let hash = format!("0x{}", hex::encode(tx_hash.as_bytes()));
        loop {
            let receipt = self
                .rpc_ok(chain_id, "eth_getTransactionReceipt", json!([hash]))
                .await?;
            if let Some(status) = receipt.get("status").and_then(Value::as_str) {
                return Ok(status == "0x1");
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProofportError::dependency(format!(
                    "no receipt for {} within {:?}",
                    hash, timeout
                )));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

/// Four-byte function selector
fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn pad_word(bytes: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(bytes);
    word
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// ABI-encode `verify(bytes proof, bytes32[] publicInputs)`
pub fn encode_verify_call(proof: &[u8], public_inputs: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&selector(VERIFY_SELECTOR));

    let proof_padded = proof.len().div_ceil(32) * 32;
    // Head: offsets of the two dynamic arguments
    out.extend_from_slice(&u256_word(U256::from(64u64)));
    out.extend_from_slice(&u256_word(U256::from(64 + 32 + proof_padded)));
    // bytes proof
    out.extend_from_slice(&u256_word(U256::from(proof.len())));
    out.extend_from_slice(proof);
    out.resize(out.len() + (proof_padded - proof.len()), 0);
    // bytes32[] publicInputs
    out.extend_from_slice(&u256_word(U256::from(public_inputs.len())));
    for word in public_inputs {
        out.extend_from_slice(word);
    }
    out
}

/// ABI-encode `transfer(address to, uint256 amount)`
pub fn encode_transfer_call(to: Address, amount: U256) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&selector(TRANSFER_SELECTOR));
    out.extend_from_slice(&pad_word(to.as_bytes()));
    out.extend_from_slice(&u256_word(amount));
    out
}

/// Decode a 32-byte ABI bool return value
fn decode_bool(result: &str) -> bool {
    let stripped = result.trim_start_matches("0x");
    hex::decode(stripped)
        .ok()
        .and_then(|bytes| bytes.last().copied())
        .map(|b| b != 0)
        .unwrap_or(false)
}

/// Parse a JSON-RPC hex quantity
fn parse_quantity(value: &Value) -> Result<U256> {
    let raw = value
        .as_str()
        .ok_or_else(|| ProofportError::dependency("expected hex quantity"))?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| ProofportError::dependency(format!("bad hex quantity {}", raw)))
}

/// Extract a human-readable revert reason from a JSON-RPC error object
fn revert_reason(error: &Value) -> String {
    // Error(string) payloads carry the ABI-encoded reason in `data`
    if let Some(data) = error.get("data").and_then(Value::as_str) {
        if let Some(reason) = decode_revert_string(data) {
            return reason;
        }
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("execution reverted")
        .to_string()
}

/// Decode an `Error(string)` revert payload (selector 0x08c379a0)
fn decode_revert_string(data: &str) -> Option<String> {
    let stripped = data.trim_start_matches("0x");
    if !stripped.starts_with("08c379a0") {
        return None;
    }
    let bytes = hex::decode(&stripped[8..]).ok()?;
    if bytes.len() < 64 {
        return None;
    }
    let len = U256::from_big_endian(&bytes[32..64]);
    if len > U256::from(bytes.len()) {
        return None;
    }
    let reason = bytes.get(64..64 + len.as_usize())?;
    String::from_utf8(reason.to_vec()).ok()
}

/// Sign an EIP-1559 transaction, returning the raw bytes for submission
#[allow(clippy::too_many_arguments)]
fn sign_eip1559(
    key: &SigningKey,
    chain_id: u64,
    nonce: U256,
    tip: U256,
    max_fee: U256,
    gas_limit: U256,
    to: Address,
    value: U256,
    data: &[u8],
) -> Result<Vec<u8>> {
    let mut payload = rlp::RlpStream::new_list(9);
    append_quantity(&mut payload, U256::from(chain_id));
    append_quantity(&mut payload, nonce);
    append_quantity(&mut payload, tip);
    append_quantity(&mut payload, max_fee);
    append_quantity(&mut payload, gas_limit);
    payload.append(&to.as_bytes().to_vec());
    append_quantity(&mut payload, value);
    payload.append(&data.to_vec());
    payload.begin_list(0);

    let mut preimage = vec![0x02u8];
    preimage.extend_from_slice(&payload.out());
    let sighash = keccak256(&preimage);

    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&sighash)
        .map_err(|e| ProofportError::internal(format!("transaction signing failed: {}", e)))?;
    let r = signature.r().to_bytes();
    let s = signature.s().to_bytes();

    let mut signed = rlp::RlpStream::new_list(12);
    append_quantity(&mut signed, U256::from(chain_id));
    append_quantity(&mut signed, nonce);
    append_quantity(&mut signed, tip);
    append_quantity(&mut signed, max_fee);
    append_quantity(&mut signed, gas_limit);
    signed.append(&to.as_bytes().to_vec());
    append_quantity(&mut signed, value);
    signed.append(&data.to_vec());
    signed.begin_list(0);
    append_quantity(&mut signed, U256::from(recovery_id.to_byte()));
    signed.append(&trim_leading_zeros(r.as_slice()));
    signed.append(&trim_leading_zeros(s.as_slice()));

    let mut raw = vec![0x02u8];
    raw.extend_from_slice(&signed.out());
    Ok(raw)
}

fn append_quantity(stream: &mut rlp::RlpStream, value: U256) {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    stream.append(&trim_leading_zeros(&buf));
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}
