//! Main execution logic for tl-detector.

use std::sync::Arc;
use thiserror::Error;
use tl_error::{ErrorCategory, PipelineFailure, TlError, classify_error};
use tl_inference::SignatureClient;
use tl_pipeline::{FileWriter, LineInput, PipelineBuilder, StatsSnapshot};
use tl_types::DetectorConfig;
use tracing::{info, warn};

use crate::args::Cli;

/// Why a run did not succeed.
#[derive(Error, Debug)]
pub enum RunError {
    /// Failed before the pipeline started
    #[error("{0}")]
    Setup(#[from] TlError),

    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),
}

impl RunError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Setup(e) => classify_error(e),
            Self::Pipeline(failure) => failure.category,
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::FatalConfiguration => 2,
            ErrorCategory::FatalIo => 3,
            ErrorCategory::Cancelled => 130,
            ErrorCategory::FatalInternal
            | ErrorCategory::RecoverableLocal
            | ErrorCategory::RecoverableRemote => 4,
        }
    }
}

/// Loads the config file (if any) and applies command-line overrides.
pub fn load_config(args: &Cli) -> Result<DetectorConfig, TlError> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };

    if let Some(input) = &args.input {
        config.input = Some(input.clone());
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if args.append {
        config.overwrite = false;
    }
    if let Some(threshold) = args.threshold {
        config.pipeline.inference_threshold = threshold;
    }

    config.validate().map_err(TlError::Config)?;
    Ok(config)
}

/// Execute a detection run with the provided arguments.
pub async fn execute(args: Cli) -> Result<StatsSnapshot, RunError> {
    let config = load_config(&args)?;
    let input = config
        .input
        .clone()
        .ok_or_else(|| TlError::Config("no input file given".to_string()))?;

    let client = Arc::new(SignatureClient::new(config.pipeline.feature_length));
    let pipeline = PipelineBuilder::new(config.pipeline.clone())
        .source(LineInput::file(&input))
        .deserialize()
        .infer(client)
        .classify()
        .sink(Box::new(FileWriter::new(&config.output, config.overwrite)))
        .build()?;

    info!(
        run_id = %pipeline.run_id(),
        input = %input.display(),
        output = %config.output.display(),
        overwrite = config.overwrite,
        "Detector configured"
    );

    let cancel = pipeline.cancel_handle();
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping pipeline");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let result = pipeline.run().await;
    signal.abort();

    Ok(result?)
}
