//! Core types for the proofport service
//!
//! Type-safe representations of every record the coordination plane owns:
//! signing sessions, asynchronous tasks, payment ledger rows, durable proof
//! results, and the static circuit registry.
//!
//! # Architecture
//!
//! - [`circuit`] - the static circuit registry and chain configuration
//! - [`session`] - signing-session records and phase derivation
//! - [`task`] - task objects, message parts, and the valid-transition table
//! - [`payment`] - payment ledger rows and payment-header payload decoding
//! - [`proof`] - proof results, cache entries, and public-input
//!   normalization
//!
//! Wire JSON is camelCase throughout; every record that crosses a protocol
//! boundary carries `#[serde(rename_all = "camelCase")]`.

pub mod circuit;
pub mod payment;
pub mod proof;
pub mod session;
pub mod task;

// Re-export commonly used types
pub use circuit::{ChainConfig, CircuitInfo, CIRCUITS};
pub use payment::{PaymentHeaderPayload, PaymentRecord, PaymentSettlementStatus};
pub use proof::{normalize_public_inputs, proof_cache_key, AttestationSnapshot, ProofCacheEntry, ProofResult};
pub use session::{PaymentStatus, SessionPhase, SessionRecord, SessionStatus};
pub use task::{Artifact, Message, Part, Task, TaskState, TaskStatus};
