//! Inference client trait.

use async_trait::async_trait;
use tl_error::InferenceError;
use tl_types::FeatureVector;

/// Trait for inference backends.
///
/// The pipeline treats the backend as an opaque collaborator: it sends at
/// most `model_max_batch_size` vectors per call and expects exactly one score
/// per vector, in request order.
///
/// # Errors
///
/// - [`InferenceError::Transient`] / [`InferenceError::Timeout`] are retried
///   and eventually degrade the affected records to `unknown`
/// - [`InferenceError::Malformed`] aborts the pipeline
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Scores a chunk of feature vectors.
    ///
    /// # Arguments
    ///
    /// * `features` - One vector per record, all of the configured length
    ///
    /// # Returns
    ///
    /// One score per input vector
    async fn infer(&self, features: &[FeatureVector]) -> Result<Vec<f64>, InferenceError>;

    /// Returns the client name for logging.
    fn name(&self) -> &str;
}
