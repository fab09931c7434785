//! Typed stores over the shared KV layer
//!
//! Each record class has exactly one store, and each store owns its key
//! prefix:
//!
//! - [`session::SessionStore`] - `signing:{id}`
//! - [`task::TaskStore`] - `task:{id}`, `queue:submitted`, `ctx:{context_id}`
//! - [`proof::ProofStore`] - `proof:{proof_id}`
//! - [`proof::ProofCache`] - `cache:proof:{key}`
//! - [`payment::PaymentStore`] - `payment:{id}`
//! - [`rate_limit::RateLimiter`] - `rate:{subject}`
//! - [`chat::ChatStore`] - `chat:session:{id}`

pub mod chat;
pub mod payment;
pub mod proof;
pub mod rate_limit;
pub mod session;
pub mod task;

pub use chat::{ChatSession, ChatStore};
pub use payment::PaymentStore;
pub use proof::{ProofCache, ProofStore};
pub use rate_limit::RateLimiter;
pub use session::SessionStore;
pub use task::TaskStore;
