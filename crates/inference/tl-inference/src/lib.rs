//! Inference support for threatline.
//!
//! - [`encode_payload`] turns payload text into fixed-length token vectors
//! - [`ResilientClient`] wraps any [`InferenceClient`](tl_traits::InferenceClient)
//!   with per-call timeouts, retries with backoff, and a circuit breaker
//! - [`SignatureClient`] is an offline client scoring known attack signatures

pub mod circuit;
pub mod features;
pub mod resilient;
pub mod retry;
pub mod signature;

pub use circuit::{Admission, CircuitBreaker, CircuitState, TrialGuard};
pub use features::{decode_tokens, encode_payload};
pub use resilient::{
    ChunkScores, DegradeReason, InferenceStats, InferenceStatsSnapshot, ResilientClient,
    normalize_score,
};
pub use retry::{RetryError, RetryPolicy, with_retry};
pub use signature::SignatureClient;
