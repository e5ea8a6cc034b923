//! Pipeline stages.
//!
//! The set of stages is closed: every stage is a variant of [`Stage`] and
//! runs through [`Stage::run`], which owns the stage's edges and guarantees
//! that exactly one terminal frame is sent downstream.

mod classify;
mod deserialize;
mod infer;
mod sink;
mod source;

pub use classify::{ClassifyStage, Renderer};
pub use deserialize::DeserializeStage;
pub use infer::InferStage;
pub use sink::{FileWriter, SinkStage};
pub use source::{LineInput, SourceStage};

use crate::edge::{AbortReason, EdgeReceiver, EdgeSender};
use crate::stats::PipelineStats;
use std::sync::Arc;
use tl_error::{PipelineError, Result, StageKind, TlError};
use tl_types::{PayloadKind, PipelineConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shared, read-only state handed to every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub stats: Arc<PipelineStats>,
    pub cancel: CancellationToken,
}

/// How a stage finished.
#[derive(Debug)]
pub enum StageStatus {
    /// Input exhausted, everything forwarded
    Completed,

    /// Stopped early because of another stage or cancellation
    Aborted(AbortReason),

    /// Hit a fatal error
    Failed(TlError),
}

impl StageStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Non-failure outcome of a stage body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageExit {
    Completed,
    Aborted(AbortReason),
}

/// A pipeline stage.
pub enum Stage {
    Source(SourceStage),
    Deserialize(DeserializeStage),
    Infer(InferStage),
    Classify(ClassifyStage),
    Sink(SinkStage),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Source(_) => StageKind::Source,
            Self::Deserialize(_) => StageKind::Deserialize,
            Self::Infer(_) => StageKind::Infer,
            Self::Classify(_) => StageKind::Classify,
            Self::Sink(_) => StageKind::Sink,
        }
    }

    /// What the stage consumes; `None` for the source.
    pub fn input_kind(&self) -> Option<PayloadKind> {
        match self {
            Self::Source(_) => None,
            Self::Deserialize(_) => Some(PayloadKind::Lines),
            Self::Infer(_) | Self::Classify(_) => Some(PayloadKind::Records),
            Self::Sink(_) => Some(PayloadKind::Rendered),
        }
    }

    /// What the stage produces; `None` for the sink.
    pub fn output_kind(&self) -> Option<PayloadKind> {
        match self {
            Self::Source(_) => Some(PayloadKind::Lines),
            Self::Deserialize(_) | Self::Infer(_) => Some(PayloadKind::Records),
            Self::Classify(_) => Some(PayloadKind::Rendered),
            Self::Sink(_) => None,
        }
    }

    /// Runs the stage to completion.
    ///
    /// Sends `End` downstream on success and `Abort` otherwise. A failing
    /// stage also cancels the pipeline so the source stops reading.
    pub async fn run(
        self,
        mut input: Option<EdgeReceiver>,
        mut output: Option<EdgeSender>,
        ctx: StageContext,
    ) -> StageStatus {
        let kind = self.kind();
        debug!(stage = %kind, "Stage started");

        let result = match self {
            Self::Source(stage) => match output.as_mut() {
                Some(out) => stage.run(out, &ctx).await,
                None => Err(missing_edge(kind, "output")),
            },
            Self::Deserialize(stage) => match (input.as_mut(), output.as_mut()) {
                (Some(inp), Some(out)) => stage.run(inp, out, &ctx).await,
                _ => Err(missing_edge(kind, "input or output")),
            },
            Self::Infer(stage) => match (input.as_mut(), output.as_mut()) {
                (Some(inp), Some(out)) => stage.run(inp, out, &ctx).await,
                _ => Err(missing_edge(kind, "input or output")),
            },
            Self::Classify(stage) => match (input.as_mut(), output.as_mut()) {
                (Some(inp), Some(out)) => stage.run(inp, out, &ctx).await,
                _ => Err(missing_edge(kind, "input or output")),
            },
            Self::Sink(stage) => match input.as_mut() {
                Some(inp) => stage.run(inp, &ctx).await,
                None => Err(missing_edge(kind, "input")),
            },
        };

        // upstream producers blocked on a full edge see the close right away
        drop(input);

        match result {
            Ok(StageExit::Completed) => {
                if let Some(output) = output {
                    output.end().await;
                }
                info!(stage = %kind, "Stage completed");
                StageStatus::Completed
            }
            Ok(StageExit::Aborted(reason)) => {
                if let Some(output) = output {
                    output.abort(reason).await;
                }
                info!(stage = %kind, reason = %reason, "Stage aborted");
                StageStatus::Aborted(reason)
            }
            Err(e) => {
                error!(stage = %kind, error = %e, "Stage failed");
                ctx.cancel.cancel();
                if let Some(output) = output {
                    output.abort(AbortReason::UpstreamFailed(kind)).await;
                }
                StageStatus::Failed(e)
            }
        }
    }
}

fn missing_edge(stage: StageKind, which: &str) -> TlError {
    PipelineError::Wiring(format!("{} stage is missing its {} edge", stage, which)).into()
}

/// Rejects a batch whose payload does not match what the stage consumes.
pub(crate) fn unexpected_payload(
    stage: StageKind,
    expected: PayloadKind,
    got: PayloadKind,
) -> TlError {
    PipelineError::Wiring(format!(
        "{} stage expected {} batches, got {}",
        stage, expected, got
    ))
    .into()
}

/// Convenience alias for stage bodies.
pub(crate) type StageResult = Result<StageExit>;
