//! Resilient wrapper around an inference client.

use crate::circuit::{Admission, CircuitBreaker, CircuitState};
use crate::retry::{RetryError, RetryPolicy, with_retry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tl_error::InferenceError;
use tl_traits::InferenceClient;
use tl_types::{FeatureVector, InferenceConfig};
use tracing::{debug, warn};

/// Why a chunk was not scored.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    /// Every attempt failed with a transient error
    RetriesExhausted {
        attempts: u32,
        last_error: InferenceError,
    },

    /// The circuit breaker rejected the call
    CircuitOpen,
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "retries exhausted after {} attempts: {}", attempts, last_error),
            Self::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

/// Result of scoring one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkScores {
    /// One raw score per feature vector, in request order
    Scored(Vec<f64>),

    /// The chunk could not be scored; its records become `unknown`
    Degraded(DegradeReason),
}

/// Counters for inference calls.
#[derive(Debug, Default)]
pub struct InferenceStats {
    calls: AtomicU64,
    retries: AtomicU64,
    chunks_scored: AtomicU64,
    chunks_exhausted: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl InferenceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of client calls (including retries).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Get the number of retried calls.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Get the number of chunks scored.
    pub fn chunks_scored(&self) -> u64 {
        self.chunks_scored.load(Ordering::Relaxed)
    }

    /// Get the number of chunks that exhausted their retries.
    pub fn chunks_exhausted(&self) -> u64 {
        self.chunks_exhausted.load(Ordering::Relaxed)
    }

    /// Get the number of chunks rejected by the open circuit.
    pub fn circuit_rejections(&self) -> u64 {
        self.circuit_rejections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> InferenceStatsSnapshot {
        InferenceStatsSnapshot {
            calls: self.calls(),
            retries: self.retries(),
            chunks_scored: self.chunks_scored(),
            chunks_exhausted: self.chunks_exhausted(),
            circuit_rejections: self.circuit_rejections(),
        }
    }
}

/// A serializable snapshot of inference statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceStatsSnapshot {
    pub calls: u64,
    pub retries: u64,
    pub chunks_scored: u64,
    pub chunks_exhausted: u64,
    pub circuit_rejections: u64,
}

/// Wraps an [`InferenceClient`] with timeouts, retries and a circuit breaker.
///
/// Transient failures never escape: a chunk either comes back scored or
/// degraded. Only non-retryable errors are returned, and they are fatal to
/// the pipeline. A response of the wrong length counts as malformed.
pub struct ResilientClient {
    inner: Arc<dyn InferenceClient>,
    policy: RetryPolicy,
    timeout: Duration,
    breaker: CircuitBreaker,
    stats: Arc<InferenceStats>,
}

impl ResilientClient {
    /// Creates a wrapper configured from `config`.
    pub fn new(inner: Arc<dyn InferenceClient>, config: &InferenceConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::from_config(config),
            timeout: config.timeout,
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_reset_timeout,
            ),
            stats: Arc::new(InferenceStats::new()),
        }
    }

    /// Shares an existing stats tracker.
    pub fn with_stats(mut self, stats: Arc<InferenceStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<InferenceStats> {
        &self.stats
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Scores one chunk of feature vectors.
    ///
    /// # Returns
    ///
    /// Scores or a degrade reason; `Err` only for non-retryable errors.
    pub async fn score_chunk(
        &self,
        features: &[FeatureVector],
    ) -> Result<ChunkScores, InferenceError> {
        if features.is_empty() {
            return Ok(ChunkScores::Scored(Vec::new()));
        }

        let admission = self.breaker.acquire();
        if admission == Admission::Rejected {
            self.stats.circuit_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(chunk_size = features.len(), "Circuit open, degrading chunk");
            return Ok(ChunkScores::Degraded(DegradeReason::CircuitOpen));
        }
        // cancelled mid-call, the trial slot must not stay taken
        let mut trial = self.breaker.trial_guard(admission);

        let attempts = AtomicU32::new(0);
        let result = {
            let attempts = &attempts;
            let inner = &self.inner;
            let stats = &self.stats;
            let timeout = self.timeout;
            with_retry(&self.policy, inner.name(), move || async move {
                attempts.fetch_add(1, Ordering::Relaxed);
                stats.calls.fetch_add(1, Ordering::Relaxed);
                call_once(&**inner, features, timeout).await
            })
            .await
        };

        trial.disarm();

        let retries = u64::from(attempts.load(Ordering::Relaxed).saturating_sub(1));
        self.stats.retries.fetch_add(retries, Ordering::Relaxed);

        match result {
            Ok(scores) => {
                self.breaker.record_success();
                self.stats.chunks_scored.fetch_add(1, Ordering::Relaxed);
                Ok(ChunkScores::Scored(scores))
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                self.breaker.record_failure();
                self.stats.chunks_exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    client = self.inner.name(),
                    chunk_size = features.len(),
                    attempts = attempts,
                    error = %last_error,
                    "Inference retries exhausted, degrading chunk"
                );
                Ok(ChunkScores::Degraded(DegradeReason::RetriesExhausted {
                    attempts,
                    last_error,
                }))
            }
            Err(RetryError::Fatal(e)) => {
                // the backend answered; it is the request that is wrong
                self.breaker.record_success();
                Err(e)
            }
        }
    }
}

async fn call_once(
    client: &dyn InferenceClient,
    features: &[FeatureVector],
    timeout: Duration,
) -> Result<Vec<f64>, InferenceError> {
    let scores = tokio::time::timeout(timeout, client.infer(features))
        .await
        .map_err(|_| InferenceError::Timeout(timeout))??;

    if scores.len() != features.len() {
        return Err(InferenceError::Malformed(format!(
            "expected {} scores, got {}",
            features.len(),
            scores.len()
        )));
    }
    Ok(scores)
}

/// Maps a raw score into `[0, 1]`; `None` for NaN or infinite scores.
pub fn normalize_score(raw: f64) -> Option<f64> {
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}
