//! Attestation envelope verification
//!
//! The prover returns its attestation as a base64 COSE_Sign1 structure:
//! a CBOR array `[protected bstr, unprotected map, payload bstr, sig bstr]`,
//! optionally wrapped in CBOR tag 18. The payload is the attestation
//! document: module id, digest algorithm, millisecond timestamp, PCR map,
//! leaf certificate, CA bundle, and optional public key / user data /
//! nonce fields.
//!
//! Verification policy:
//! 1. Timestamp freshness against a configured maximum age.
//! 2. Optional byte-exact expectations for PCR0/PCR1/PCR2.
//! 3. Leaf and every CA bundle entry parse as X.509.
//! 4. ECDSA over the COSE `Signature1` structure, hashed per the algorithm
//!    in the protected header (−7 → P-256/SHA-256, −35 → P-384/SHA-384;
//!    −36 is reported as unsupported), with the raw `R || S` signature
//!    converted to DER before verification against the leaf key.
//!
//! Full chain-to-root path validation is a known limitation and is not
//! performed here.
//!
//! A failed check is a structured result, never an `Err`.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use ciborium::Value;
use ecdsa::signature::Verifier;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use x509_parser::prelude::FromDer;

/// COSE algorithm id for ES256
const ALG_ES256: i128 = -7;
/// COSE algorithm id for ES384
const ALG_ES384: i128 = -35;
/// COSE algorithm id for ES512 (not supported)
const ALG_ES512: i128 = -36;

/// Parsed attestation document (the COSE payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDocument {
    pub module_id: String,
    /// Digest algorithm name, e.g. "SHA384"
    pub digest: String,
    /// Milliseconds since epoch
    pub timestamp_ms: u64,
    /// PCR index → measurement bytes
    pub pcrs: BTreeMap<u32, Vec<u8>>,
    /// Leaf certificate, DER
    pub certificate: Vec<u8>,
    /// CA bundle, DER entries
    pub cabundle: Vec<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
}

/// Parsed signed envelope around the document
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    /// Raw protected-header bytes, exactly as signed
    pub protected: Vec<u8>,
    /// Raw payload bytes, exactly as signed
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// Algorithm id from the protected header
    pub alg: Option<i128>,
    pub document: AttestationDocument,
}

/// Outcome of attestation verification: individual pass/fail flags plus
/// an optional reason for the first failure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationVerification {
    pub timestamp_fresh: bool,
    pub pcrs_match: bool,
    pub certificates_parsed: bool,
    pub signature_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AttestationVerification {
    /// Whether every check passed
    pub fn is_valid(&self) -> bool {
        self.timestamp_fresh && self.pcrs_match && self.certificates_parsed && self.signature_valid
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            timestamp_fresh: false,
            pcrs_match: false,
            certificates_parsed: false,
            signature_valid: false,
            error: Some(error.into()),
            module_id: None,
            timestamp: None,
        }
    }
}

/// Expected PCR measurements; `None` entries are not checked
#[derive(Debug, Clone, Default)]
pub struct ExpectedPcrs {
    pub pcr0: Option<Vec<u8>>,
    pub pcr1: Option<Vec<u8>>,
    pub pcr2: Option<Vec<u8>>,
}

/// Attestation envelope verifier
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    max_age: Duration,
    expected: ExpectedPcrs,
}

impl AttestationVerifier {
    /// Create a verifier with the configured maximum document age
    pub fn new(max_age: Duration, expected: ExpectedPcrs) -> Self {
        Self { max_age, expected }
    }

    /// Verify a base64 envelope against the policy
    pub fn verify(&self, document_b64: &str) -> AttestationVerification {
        let envelope = match parse_envelope(document_b64) {
            Ok(envelope) => envelope,
            Err(reason) => return AttestationVerification::rejected(reason),
        };
        self.verify_envelope(&envelope)
    }

    /// Verify an already-parsed envelope
    pub fn verify_envelope(&self, envelope: &SignedEnvelope) -> AttestationVerification {
        let doc = &envelope.document;
        let mut error = None;

        let timestamp = Utc
            .timestamp_millis_opt(doc.timestamp_ms as i64)
            .single()
            .unwrap_or_default();
        let age_ms = Utc::now().timestamp_millis() - doc.timestamp_ms as i64;
        let timestamp_fresh = age_ms <= self.max_age.as_millis() as i64;
        if !timestamp_fresh {
            error.get_or_insert_with(|| format!("attestation is {}ms old", age_ms));
        }

        let pcrs_match = self.check_pcrs(doc, &mut error);

        let certificates_parsed = check_certificates(doc, &mut error);

        let signature_valid = if certificates_parsed {
            match verify_signature(envelope) {
                Ok(()) => true,
                Err(reason) => {
                    error.get_or_insert(reason);
                    false
                }
            }
        } else {
            false
        };

        AttestationVerification {
            timestamp_fresh,
            pcrs_match,
            certificates_parsed,
            signature_valid,
            error,
            module_id: Some(doc.module_id.clone()),
            timestamp: Some(timestamp),
        }
    }

    fn check_pcrs(&self, doc: &AttestationDocument, error: &mut Option<String>) -> bool {
        let expectations = [
            (0u32, &self.expected.pcr0),
            (1u32, &self.expected.pcr1),
            (2u32, &self.expected.pcr2),
        ];
        for (index, expected) in expectations {
            if let Some(expected) = expected {
                if doc.pcrs.get(&index) != Some(expected) {
                    error.get_or_insert_with(|| format!("PCR{} mismatch", index));
                    return false;
                }
            }
        }
        true
    }
}

fn check_certificates(doc: &AttestationDocument, error: &mut Option<String>) -> bool {
    if x509_parser::certificate::X509Certificate::from_der(&doc.certificate).is_err() {
        error.get_or_insert_with(|| "leaf certificate is not valid X.509".to_string());
        return false;
    }
    for (i, ca) in doc.cabundle.iter().enumerate() {
        if x509_parser::certificate::X509Certificate::from_der(ca).is_err() {
            error.get_or_insert_with(|| format!("cabundle[{}] is not valid X.509", i));
            return false;
        }
    }
    true
}

/// Build the COSE `Signature1` structure over which the envelope is signed
fn build_sig_structure(protected: &[u8], payload: &[u8]) -> Vec<u8> {
    let structure = Value::Array(vec![
        Value::Text("Signature1".to_string()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ]);
    let mut out = Vec::new();
    // Serializing a fully-owned Value cannot fail
    ciborium::into_writer(&structure, &mut out).unwrap_or_default();
    out
}

fn verify_signature(envelope: &SignedEnvelope) -> std::result::Result<(), String> {
    let alg = envelope
        .alg
        .ok_or_else(|| "protected header carries no algorithm".to_string())?;
    let message = build_sig_structure(&envelope.protected, &envelope.payload);

    let (_, cert) =
        x509_parser::certificate::X509Certificate::from_der(&envelope.document.certificate)
            .map_err(|_| "leaf certificate is not valid X.509".to_string())?;
    let spki = cert.public_key().subject_public_key.data.as_ref();

    match alg {
        ALG_ES256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(spki)
                .map_err(|_| "leaf key is not a P-256 key (alg ES256)".to_string())?;
            let raw = p256::ecdsa::Signature::from_slice(&envelope.signature)
                .map_err(|_| "signature is not 64 raw bytes".to_string())?;
            let der = raw.to_der();
            key.verify(&message, &der)
                .map_err(|_| "signature does not verify".to_string())
        }
        ALG_ES384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(spki)
                .map_err(|_| "leaf key is not a P-384 key (alg ES384)".to_string())?;
            let raw = p384::ecdsa::Signature::from_slice(&envelope.signature)
                .map_err(|_| "signature is not 96 raw bytes".to_string())?;
            let der = raw.to_der();
            key.verify(&message, &der)
                .map_err(|_| "signature does not verify".to_string())
        }
        ALG_ES512 => Err("ES512 attestations are not supported".to_string()),
        other => Err(format!("unsupported COSE algorithm {}", other)),
    }
}

/// Parse a base64 COSE_Sign1 envelope
pub fn parse_envelope(document_b64: &str) -> std::result::Result<SignedEnvelope, String> {
    let bytes = general_purpose::STANDARD
        .decode(document_b64.trim())
        .map_err(|_| "attestation document is not valid base64".to_string())?;
    let value: Value = ciborium::from_reader(bytes.as_slice())
        .map_err(|_| "attestation document is not valid CBOR".to_string())?;

    // COSE_Sign1 may arrive tagged (18) or bare
    let items = match value {
        Value::Tag(18, inner) => match *inner {
            Value::Array(items) => items,
            _ => return Err("COSE tag does not wrap an array".to_string()),
        },
        Value::Array(items) => items,
        _ => return Err("attestation document is not a COSE array".to_string()),
    };
    if items.len() != 4 {
        return Err(format!("COSE_Sign1 must have 4 items, got {}", items.len()));
    }

    let protected = as_bytes(&items[0]).ok_or("protected header is not a byte string")?;
    let payload = as_bytes(&items[2]).ok_or("payload is not a byte string")?;
    let signature = as_bytes(&items[3]).ok_or("signature is not a byte string")?;

    let alg = parse_alg(&protected);
    let document = parse_document(&payload)?;

    Ok(SignedEnvelope {
        protected,
        payload,
        signature,
        alg,
        document,
    })
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) => Some(b.clone()),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i128> {
    match value {
        Value::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

/// Extract the algorithm id (header key 1) from serialized protected headers
fn parse_alg(protected: &[u8]) -> Option<i128> {
    let value: Value = ciborium::from_reader(protected).ok()?;
    let entries = value.into_map().ok()?;
    for (key, val) in &entries {
        if as_int(key) == Some(1) {
            return as_int(val);
        }
    }
    None
}

/// Parse the attestation document payload map
fn parse_document(payload: &[u8]) -> std::result::Result<AttestationDocument, String> {
    let value: Value =
        ciborium::from_reader(payload).map_err(|_| "payload is not valid CBOR".to_string())?;
    let entries = value
        .into_map()
        .map_err(|_| "payload is not a CBOR map".to_string())?;

    let mut module_id = None;
    let mut digest = None;
    let mut timestamp_ms = None;
    let mut pcrs = BTreeMap::new();
    let mut certificate = None;
    let mut cabundle = Vec::new();
    let mut public_key = None;
    let mut user_data = None;
    let mut nonce = None;

    for (key, val) in entries {
        let Some(name) = key.as_text() else { continue };
        match name {
            "module_id" => module_id = val.as_text().map(str::to_string),
            "digest" => digest = val.as_text().map(str::to_string),
            "timestamp" => timestamp_ms = as_int(&val).map(|i| i as u64),
            "pcrs" => {
                let map = val
                    .into_map()
                    .map_err(|_| "pcrs is not a CBOR map".to_string())?;
                for (index, measurement) in map {
                    let Some(index) = as_int(&index) else { continue };
                    let Some(bytes) = as_bytes(&measurement) else {
                        return Err(format!("PCR{} is not a byte string", index));
                    };
                    pcrs.insert(index as u32, bytes);
                }
            }
            "certificate" => certificate = as_bytes(&val),
            "cabundle" => {
                let list = val
                    .into_array()
                    .map_err(|_| "cabundle is not an array".to_string())?;
                for entry in &list {
                    cabundle
                        .push(as_bytes(entry).ok_or("cabundle entry is not a byte string")?);
                }
            }
            "public_key" => public_key = as_bytes(&val),
            "user_data" => user_data = as_bytes(&val),
            "nonce" => nonce = as_bytes(&val),
            _ => {}
        }
    }

    Ok(AttestationDocument {
        module_id: module_id.ok_or("payload is missing module_id")?,
        digest: digest.ok_or("payload is missing digest")?,
        timestamp_ms: timestamp_ms.ok_or("payload is missing timestamp")?,
        pcrs,
        certificate: certificate.ok_or("payload is missing certificate")?,
        cabundle,
        public_key,
        user_data,
        nonce,
    })
}

/// Serialize an attestation document back into its payload map
pub fn encode_document(doc: &AttestationDocument) -> Vec<u8> {
    let mut entries = vec![
        (
            Value::Text("module_id".into()),
            Value::Text(doc.module_id.clone()),
        ),
        (Value::Text("digest".into()), Value::Text(doc.digest.clone())),
        (
            Value::Text("timestamp".into()),
            Value::Integer((doc.timestamp_ms as i64).into()),
        ),
        (
            Value::Text("pcrs".into()),
            Value::Map(
                doc.pcrs
                    .iter()
                    .map(|(i, m)| (Value::Integer((*i as i64).into()), Value::Bytes(m.clone())))
                    .collect(),
            ),
        ),
        (
            Value::Text("certificate".into()),
            Value::Bytes(doc.certificate.clone()),
        ),
        (
            Value::Text("cabundle".into()),
            Value::Array(doc.cabundle.iter().cloned().map(Value::Bytes).collect()),
        ),
    ];
    if let Some(public_key) = &doc.public_key {
        entries.push((
            Value::Text("public_key".into()),
            Value::Bytes(public_key.clone()),
        ));
    }
    if let Some(user_data) = &doc.user_data {
        entries.push((
            Value::Text("user_data".into()),
            Value::Bytes(user_data.clone()),
        ));
    }
    if let Some(nonce) = &doc.nonce {
        entries.push((Value::Text("nonce".into()), Value::Bytes(nonce.clone())));
    }
    let mut out = Vec::new();
    ciborium::into_writer(&Value::Map(entries), &mut out).unwrap_or_default();
    out
}

/// Serialize protected headers declaring an algorithm
pub fn encode_protected(alg: i128) -> Vec<u8> {
    let map = Value::Map(vec![(
        Value::Integer(1.into()),
        Value::Integer((alg as i64).into()),
    )]);
    let mut out = Vec::new();
    ciborium::into_writer(&map, &mut out).unwrap_or_default();
    out
}

/// Assemble a base64 COSE_Sign1 envelope from its signed pieces
pub fn build_envelope(protected: &[u8], payload: &[u8], signature: &[u8]) -> String {
    let cose = Value::Tag(
        18,
        Box::new(Value::Array(vec![
            Value::Bytes(protected.to_vec()),
            Value::Map(Vec::new()),
            Value::Bytes(payload.to_vec()),
            Value::Bytes(signature.to_vec()),
        ])),
    );
    let mut out = Vec::new();
    ciborium::into_writer(&cose, &mut out).unwrap_or_default();
    general_purpose::STANDARD.encode(out)
}
