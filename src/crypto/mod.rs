//! Cryptographic utilities for proofport
//!
//! This module provides the primitives shared across the service:
//!
//! - [`keccak256`] - Keccak-256 hashing
//! - [`signal_hash`] - the public binding input of a proof, a keccak of
//!   `(address, scope, circuit_id)` with a bit-exact byte layout
//! - [`parse_address`] - canonical 20-byte address parsing
//! - [`operator_address`] - derive the operator address from a private key
//!
//! # Signal hash layout
//!
//! `signal_hash = keccak256(address_20_bytes || utf8(scope) || utf8(circuit_id))`
//!
//! where `address_20_bytes` is the raw 20-byte form (no `0x` prefix, no hex
//! encoding). The hash is deterministic in its inputs and is never rewritten
//! once stored on a session.

use crate::{ProofportError, Result};
use ethereum_types::{Address, H256};
use k256::ecdsa::SigningKey;

/// Keccak-256 hash function
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(data).into()
}

/// Parse a hex address (with or without `0x` prefix) into its canonical
/// 20-byte form
pub fn parse_address(address: &str) -> Result<Address> {
    let stripped = address.trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|_| ProofportError::invalid_params("address is not valid hex"))?;
    if bytes.len() != 20 {
        return Err(ProofportError::invalid_params("address must be 20 bytes"));
    }
    Ok(Address::from_slice(&bytes))
}

/// Compute the signal hash binding `(address, scope, circuit_id)`
pub fn signal_hash(address: &str, scope: &str, circuit_id: &str) -> Result<H256> {
    let addr = parse_address(address)?;
    let mut preimage = Vec::with_capacity(20 + scope.len() + circuit_id.len());
    preimage.extend_from_slice(addr.as_bytes());
    preimage.extend_from_slice(scope.as_bytes());
    preimage.extend_from_slice(circuit_id.as_bytes());
    Ok(H256::from(keccak256(&preimage)))
}

/// Hex-encode a 32-byte hash with a `0x` prefix
pub fn to_hex32(hash: H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

/// Parse a 65-byte hex signature, returning the raw bytes
pub fn parse_signature(signature: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|_| ProofportError::invalid_params("signature is not valid hex"))?;
    if bytes.len() != 65 {
        return Err(ProofportError::invalid_params("signature must be 65 bytes"));
    }
    Ok(bytes)
}

/// Parse an operator private key into a signing key
pub fn parse_operator_key(private_key: &str) -> Result<SigningKey> {
    let bytes = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|_| ProofportError::config("operator key is not valid hex"))?;
    SigningKey::from_slice(&bytes).map_err(|_| ProofportError::config("invalid operator key"))
}

/// Derive the Ethereum address controlled by a signing key
pub fn operator_address(key: &SigningKey) -> Address {
    let pubkey = key.verifying_key().to_encoded_point(false);
    // Drop the 0x04 SEC1 tag, keccak the remaining 64 bytes, keep the last 20
    let hash = keccak256(&pubkey.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_roundtrip() {
        let addr = parse_address("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01").unwrap();
        assert_eq!(
            hex::encode(addr.as_bytes()),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01"
        );
        // Prefix is optional
        let bare = parse_address("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01").unwrap();
        assert_eq!(addr, bare);
    }

    #[test]
    fn test_parse_address_rejects_bad_input() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not-hex").is_err());
    }

    #[test]
    fn test_signal_hash_layout() {
        // The hash commits to raw address bytes followed by utf8 scope and
        // circuit id, in that order.
        let address = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01";
        let got = signal_hash(address, "app.example", "coinbase_attestation").unwrap();

        let mut preimage = Vec::new();
        preimage
            .extend_from_slice(&hex::decode("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01").unwrap());
        preimage.extend_from_slice(b"app.example");
        preimage.extend_from_slice(b"coinbase_attestation");
        assert_eq!(got, H256::from(keccak256(&preimage)));
    }

    #[test]
    fn test_signal_hash_deterministic() {
        let a = signal_hash("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01", "s", "c").unwrap();
        let b = signal_hash("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01", "s", "c").unwrap();
        assert_eq!(a, b);
        // Any input change moves the hash
        let c = signal_hash("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01", "s2", "c").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_signature_length() {
        let sig = format!("0x{}", "11".repeat(65));
        assert_eq!(parse_signature(&sig).unwrap().len(), 65);
        assert!(parse_signature("0x1122").is_err());
    }

    #[test]
    fn test_operator_address_derivation() {
        let key = parse_operator_key(
            "0x0101010101010101010101010101010101010101010101010101010101010101",
        )
        .unwrap();
        let addr = operator_address(&key);
        assert_eq!(addr.as_bytes().len(), 20);
        // Deterministic
        assert_eq!(addr, operator_address(&key));
    }
}
