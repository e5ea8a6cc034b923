//! Error types and classification for threatline.
//!
//! This crate provides:
//! - [`TlError`] - Top-level error enum for all pipeline errors
//! - Domain-specific errors ([`SourceError`], [`InferenceError`], [`SinkError`], [`PipelineError`])
//! - [`ErrorCategory`] for deciding between per-record degradation and shutdown
//! - [`StageKind`] naming the stage an error surfaced in
//! - [`PipelineFailure`], the single aggregate failure reported by a run

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for threatline.
#[derive(Error, Debug)]
pub enum TlError {
    /// Input errors (file access, reading)
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Inference client errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Output errors (open, write, flush)
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Engine invariants (wiring, ordering, stage crashes)
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled from outside
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Generic errors (wrapped anyhow)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Input-related errors.
#[derive(Error, Debug)]
pub enum SourceError {
    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// I/O error during read
    #[error("I/O error: {0}")]
    Io(String),

    /// Decompression failed
    #[error("Decompression failed: {0}")]
    Decompression(String),
}

impl SourceError {
    /// Maps an I/O error raised while opening or reading `path`.
    pub fn from_io(path: &str, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(path.to_string()),
            _ => Self::Io(format!("Failed to read '{}': {}", path, error)),
        }
    }
}

/// Errors reported by an inference client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Temporary failure (connection refused, overloaded, reset)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The call did not complete within the configured deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The request was rejected as malformed (shape or size mismatch)
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl InferenceError {
    /// Returns true if the call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Output-related errors.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Failed to open or create the destination
    #[error("Failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to write records
    #[error("Write failed: {0}")]
    Write(String),

    /// Failed to flush or sync written data
    #[error("Flush failed: {0}")]
    Flush(String),
}

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Adjacent stages disagree on what flows between them
    #[error("Invalid stage wiring: {0}")]
    Wiring(String),

    /// A record reached the sink out of sequence
    #[error("Ordering violation: sequence {seq} written after {previous}")]
    Ordering { previous: u64, seq: u64 },

    /// A stage task panicked or was aborted by the runtime
    #[error("Stage {stage} crashed: {reason}")]
    StageCrashed { stage: StageKind, reason: String },
}

/// Error classification.
///
/// Recoverable categories never cross a stage boundary as failures; they are
/// turned into data (`unknown` labels, skipped counters). Fatal categories
/// shut the pipeline down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input line - skip and count
    RecoverableLocal,

    /// Transient inference failure - retry, then degrade the records
    RecoverableRemote,

    /// Configuration bug (malformed inference request, bad wiring)
    FatalConfiguration,

    /// Unreadable input or unwritable output
    FatalIo,

    /// Broken engine invariant
    FatalInternal,

    /// External cancellation
    Cancelled,
}

impl ErrorCategory {
    /// Returns true if this category aborts the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RecoverableLocal | Self::RecoverableRemote)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecoverableLocal => write!(f, "recoverable-local"),
            Self::RecoverableRemote => write!(f, "recoverable-remote"),
            Self::FatalConfiguration => write!(f, "fatal-configuration"),
            Self::FatalIo => write!(f, "fatal-io"),
            Self::FatalInternal => write!(f, "fatal-internal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Pipeline stage for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Reading raw lines from the input
    Source,

    /// Parsing lines into records
    Deserialize,

    /// Scoring records with the inference client
    Infer,

    /// Thresholding and rendering output lines
    Classify,

    /// Writing output lines to the destination
    Sink,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "Source"),
            Self::Deserialize => write!(f, "Deserialize"),
            Self::Infer => write!(f, "Infer"),
            Self::Classify => write!(f, "Classify"),
            Self::Sink => write!(f, "Sink"),
        }
    }
}

/// Classifies an error to decide between degradation and shutdown.
///
/// # Arguments
///
/// * `error` - The error to classify
///
/// # Returns
///
/// The appropriate [`ErrorCategory`]
pub fn classify_error(error: &TlError) -> ErrorCategory {
    match error {
        TlError::Source(_) => ErrorCategory::FatalIo,
        TlError::Inference(e) => classify_inference_error(e),
        TlError::Sink(_) => ErrorCategory::FatalIo,
        TlError::Pipeline(e) => classify_pipeline_error(e),
        TlError::Config(_) => ErrorCategory::FatalConfiguration,
        TlError::Cancelled => ErrorCategory::Cancelled,
        TlError::Other(_) => ErrorCategory::FatalInternal,
    }
}

fn classify_inference_error(error: &InferenceError) -> ErrorCategory {
    match error {
        InferenceError::Transient(_) => ErrorCategory::RecoverableRemote,
        InferenceError::Timeout(_) => ErrorCategory::RecoverableRemote,
        InferenceError::Malformed(_) => ErrorCategory::FatalConfiguration,
    }
}

fn classify_pipeline_error(error: &PipelineError) -> ErrorCategory {
    match error {
        PipelineError::Wiring(_) => ErrorCategory::FatalConfiguration,
        PipelineError::Ordering { .. } => ErrorCategory::FatalInternal,
        PipelineError::StageCrashed { .. } => ErrorCategory::FatalInternal,
    }
}

/// The aggregate failure of a pipeline run.
///
/// Reported once, naming the stage that triggered the shutdown and the kind of
/// error it hit.
#[derive(Error, Debug)]
#[error("pipeline failed in {stage} stage ({category}): {error}")]
pub struct PipelineFailure {
    /// Stage that triggered the shutdown
    pub stage: StageKind,

    /// Classification of the cause
    pub category: ErrorCategory,

    /// The underlying error
    #[source]
    pub error: TlError,
}

impl PipelineFailure {
    /// Creates a failure, classifying the error.
    pub fn new(stage: StageKind, error: TlError) -> Self {
        Self {
            stage,
            category: classify_error(&error),
            error,
        }
    }
}

/// Result type alias using TlError.
pub type Result<T> = std::result::Result<T, TlError>;
