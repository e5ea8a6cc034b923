//! Configuration types for the detector and its pipeline.
//!
//! Configuration is created once at startup, validated, then shared
//! read-only with every stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tl_error::{Result, TlError};

/// Identity fields rendered by default in front of the result fields.
pub const IDENTITY_FIELDS: [&str; 7] = [
    "seq",
    "timestamp",
    "src_ip",
    "dst_ip",
    "src_port",
    "dst_port",
    "protocol",
];

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Records per batch created by the source
    #[serde(default = "default_pipeline_batch_size")]
    pub pipeline_batch_size: usize,

    /// Feature vectors per inference call
    #[serde(default = "default_model_max_batch_size")]
    pub model_max_batch_size: usize,

    /// Tokens per feature vector
    #[serde(default = "default_feature_length")]
    pub feature_length: usize,

    /// Capacity of every edge, in batches
    #[serde(default = "default_edge_buffer_size")]
    pub edge_buffer_size: usize,

    /// Scores at or above this value are malicious
    #[serde(default = "default_inference_threshold")]
    pub inference_threshold: f64,

    /// Concurrent inference calls (and batches in flight in the infer stage)
    #[serde(default = "default_num_worker_threads")]
    pub num_worker_threads: usize,

    /// Retry, timeout and circuit breaker settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Output field selection
    #[serde(default)]
    pub serialize: SerializeConfig,
}

fn default_pipeline_batch_size() -> usize {
    256
}

fn default_model_max_batch_size() -> usize {
    32
}

fn default_feature_length() -> usize {
    128
}

fn default_edge_buffer_size() -> usize {
    128
}

fn default_inference_threshold() -> f64 {
    0.7
}

fn default_num_worker_threads() -> usize {
    8
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_batch_size: default_pipeline_batch_size(),
            model_max_batch_size: default_model_max_batch_size(),
            feature_length: default_feature_length(),
            edge_buffer_size: default_edge_buffer_size(),
            inference_threshold: default_inference_threshold(),
            num_worker_threads: default_num_worker_threads(),
            inference: InferenceConfig::default(),
            serialize: SerializeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of records per source batch.
    pub fn with_pipeline_batch_size(mut self, size: usize) -> Self {
        self.pipeline_batch_size = size;
        self
    }

    /// Set the number of feature vectors per inference call.
    pub fn with_model_max_batch_size(mut self, size: usize) -> Self {
        self.model_max_batch_size = size;
        self
    }

    /// Set the feature vector length.
    pub fn with_feature_length(mut self, length: usize) -> Self {
        self.feature_length = length;
        self
    }

    /// Set the edge capacity.
    pub fn with_edge_buffer_size(mut self, size: usize) -> Self {
        self.edge_buffer_size = size;
        self
    }

    /// Set the classification threshold.
    pub fn with_inference_threshold(mut self, threshold: f64) -> Self {
        self.inference_threshold = threshold;
        self
    }

    /// Set the inference concurrency.
    pub fn with_num_worker_threads(mut self, count: usize) -> Self {
        self.num_worker_threads = count;
        self
    }

    /// Set the inference resilience settings.
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    /// Set the output field selection.
    pub fn with_serialize(mut self, serialize: SerializeConfig) -> Self {
        self.serialize = serialize;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pipeline_batch_size == 0 {
            return Err("pipeline_batch_size must be at least 1".to_string());
        }
        if self.model_max_batch_size == 0 {
            return Err("model_max_batch_size must be at least 1".to_string());
        }
        if self.feature_length == 0 {
            return Err("feature_length must be at least 1".to_string());
        }
        if self.edge_buffer_size == 0 {
            return Err("edge_buffer_size must be at least 1".to_string());
        }
        if self.num_worker_threads == 0 {
            return Err("num_worker_threads must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.inference_threshold) {
            return Err(format!(
                "inference_threshold must be within [0, 1], got {}",
                self.inference_threshold
            ));
        }
        self.inference.validate()?;
        self.serialize.validate()
    }
}

/// Inference resilience configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Add up to 25% random jitter to each backoff
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Deadline for a single inference call
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,

    /// Consecutive exhausted chunks before the breaker opens
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Time the breaker stays open before admitting a trial call
    #[serde(default = "default_breaker_reset_timeout", with = "duration_ms")]
    pub breaker_reset_timeout: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
            timeout: default_timeout(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_timeout: default_breaker_reset_timeout(),
        }
    }
}

impl InferenceConfig {
    /// Set the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff bounds in milliseconds.
    pub fn with_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.initial_backoff_ms = initial;
        self.max_backoff_ms = max;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the circuit breaker parameters.
    pub fn with_breaker(mut self, failure_threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker_failure_threshold = failure_threshold;
        self.breaker_reset_timeout = reset_timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout.is_zero() {
            return Err("inference.timeout must be greater than zero".to_string());
        }
        if self.breaker_failure_threshold == 0 {
            return Err("inference.breaker_failure_threshold must be at least 1".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "inference.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Output field selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerializeConfig {
    /// Prefix of the score and label fields
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Glob patterns of fields to render (identity fields and `{prefix}*` when unset)
    #[serde(default)]
    pub include: Option<Vec<String>>,

    /// Glob patterns removed after inclusion
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_prefix() -> String {
    "threat_".to_string()
}

impl Default for SerializeConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            include: None,
            exclude: Vec::new(),
        }
    }
}

impl SerializeConfig {
    /// Set the result field prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the include patterns.
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the exclude patterns.
    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the score output field.
    pub fn score_field(&self) -> String {
        format!("{}score", self.prefix)
    }

    /// Name of the label output field.
    pub fn label_field(&self) -> String {
        format!("{}label", self.prefix)
    }

    /// The effective include patterns.
    pub fn include_patterns(&self) -> Vec<String> {
        match &self.include {
            Some(patterns) => patterns.clone(),
            None => IDENTITY_FIELDS
                .iter()
                .map(|f| f.to_string())
                .chain(std::iter::once(format!("{}*", self.prefix)))
                .collect(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.prefix.is_empty() {
            return Err("serialize.prefix must not be empty".to_string());
        }
        Ok(())
    }
}

/// Top-level detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    /// Input file (newline-delimited JSON, optionally .gz or .zst)
    #[serde(default)]
    pub input: Option<PathBuf>,

    /// Output file
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Truncate an existing output file instead of appending
    #[serde(default = "default_true")]
    pub overwrite: bool,

    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_output() -> PathBuf {
    PathBuf::from("results/threats.json")
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: default_output(),
            overwrite: true,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| TlError::Config(format!("Invalid YAML: {}", e)))
    }

    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TlError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.input.is_none() {
            return Err("input path is required".to_string());
        }
        if self.output.as_os_str().is_empty() {
            return Err("output path must not be empty".to_string());
        }
        self.pipeline.validate()
    }
}

/// Serde helper storing durations as milliseconds.
mod duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
