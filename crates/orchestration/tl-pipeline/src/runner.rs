//! Pipeline assembly and execution.

use crate::edge::{EdgeReceiver, EdgeSender, edge};
use crate::stage::{
    ClassifyStage, DeserializeStage, InferStage, LineInput, Renderer, SinkStage, SourceStage,
    Stage, StageContext, StageStatus,
};
use crate::stats::{PipelineStats, StatsSnapshot};
use std::sync::Arc;
use tl_error::{PipelineError, PipelineFailure, Result, StageKind, TlError};
use tl_traits::{InferenceClient, RecordWriter};
use tl_types::PipelineConfig;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Builds a [`Pipeline`] stage by stage.
pub struct PipelineBuilder {
    config: PipelineConfig,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
        }
    }

    pub fn source(self, input: LineInput) -> Self {
        self.stage(Stage::Source(SourceStage::new(input)))
    }

    pub fn deserialize(self) -> Self {
        self.stage(Stage::Deserialize(DeserializeStage::new()))
    }

    pub fn infer(self, client: Arc<dyn InferenceClient>) -> Self {
        self.stage(Stage::Infer(InferStage::new(client)))
    }

    pub fn classify(self) -> Self {
        self.stage(Stage::Classify(ClassifyStage::new()))
    }

    pub fn sink(self, writer: Box<dyn RecordWriter>) -> Self {
        self.stage(Stage::Sink(SinkStage::new(writer)))
    }

    /// Appends an arbitrary stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        Pipeline::new(self.config, self.stages)
    }
}

/// A validated, ready-to-run pipeline.
pub struct Pipeline {
    run_id: Uuid,
    config: Arc<PipelineConfig>,
    stages: Vec<Stage>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Validates the configuration and the stage wiring.
    ///
    /// The first stage must be a producer, the last a consumer, and each
    /// stage must consume what its predecessor produces.
    pub fn new(config: PipelineConfig, stages: Vec<Stage>) -> Result<Self> {
        config.validate().map_err(TlError::Config)?;
        validate_wiring(&stages)?;
        Renderer::from_config(&config.serialize)?;

        Ok(Self {
            run_id: Uuid::new_v4(),
            config: Arc::new(config),
            stages,
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Live statistics, readable while the pipeline runs.
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Token that stops the pipeline when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every stage to completion.
    ///
    /// Returns the final statistics, or the first fatal error in pipeline
    /// order. A run stopped through the cancel handle reports a `Cancelled`
    /// failure.
    pub async fn run(self) -> std::result::Result<StatsSnapshot, PipelineFailure> {
        let run_id = self.run_id.to_string();
        info!(
            run_id = %run_id,
            stages = self.stages.len(),
            batch_size = self.config.pipeline_batch_size,
            edge_buffer = self.config.edge_buffer_size,
            workers = self.config.num_worker_threads,
            threshold = self.config.inference_threshold,
            "Starting pipeline"
        );
        self.stats.start();

        let ctx = StageContext {
            config: self.config.clone(),
            stats: self.stats.clone(),
            cancel: self.cancel.clone(),
        };

        let count = self.stages.len();
        let mut receivers: Vec<Option<EdgeReceiver>> = Vec::with_capacity(count);
        let mut senders: Vec<Option<EdgeSender>> = Vec::with_capacity(count);
        receivers.push(None);
        for _ in 1..count {
            let (tx, rx) = edge(self.config.edge_buffer_size);
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }
        senders.push(None);

        let mut kinds = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for ((stage, input), output) in self.stages.into_iter().zip(receivers).zip(senders) {
            let kind = stage.kind();
            let span = info_span!("stage", run_id = %run_id, stage = %kind);
            kinds.push(kind);
            handles.push(tokio::spawn(
                stage.run(input, output, ctx.clone()).instrument(span),
            ));
        }

        let statuses: Vec<StageStatus> = futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(&kinds)
            .map(|(joined, &kind)| match joined {
                Ok(status) => status,
                Err(e) => {
                    error!(stage = %kind, error = %e, "Stage task panicked");
                    StageStatus::Failed(
                        PipelineError::StageCrashed {
                            stage: kind,
                            reason: e.to_string(),
                        }
                        .into(),
                    )
                }
            })
            .collect();

        self.stats.complete();
        let snapshot = self.stats.snapshot();

        if let Some(failure) = first_failure(statuses, &kinds) {
            error!(
                run_id = %run_id,
                stage = %failure.stage,
                category = %failure.category,
                error = %failure.error,
                records_written = snapshot.records_written,
                "Pipeline failed"
            );
            return Err(failure);
        }

        info!(
            run_id = %run_id,
            lines = snapshot.lines_read,
            skipped = snapshot.records_skipped,
            malicious = snapshot.malicious,
            benign = snapshot.benign,
            unknown = snapshot.unknown,
            records_written = snapshot.records_written,
            "Pipeline completed"
        );
        Ok(snapshot)
    }
}

fn validate_wiring(stages: &[Stage]) -> Result<()> {
    let (first, last) = match (stages.first(), stages.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(wiring("pipeline has no stages".to_string())),
    };

    if first.input_kind().is_some() {
        return Err(wiring(format!("first stage {} needs an input", first.kind())));
    }
    if last.output_kind().is_some() {
        return Err(wiring(format!(
            "last stage {} has nowhere to send its output",
            last.kind()
        )));
    }

    for pair in stages.windows(2) {
        let (upstream, downstream) = (&pair[0], &pair[1]);
        match (upstream.output_kind(), downstream.input_kind()) {
            (Some(produced), Some(consumed)) if produced == consumed => {}
            (produced, consumed) => {
                return Err(wiring(format!(
                    "{} stage cannot feed {} stage ({} -> {})",
                    upstream.kind(),
                    downstream.kind(),
                    produced.map_or("nothing".to_string(), |k| k.to_string()),
                    consumed.map_or("nothing".to_string(), |k| k.to_string()),
                )));
            }
        }
    }

    Ok(())
}

fn wiring(message: String) -> TlError {
    PipelineError::Wiring(message).into()
}

/// Picks the error to report for a finished run.
fn first_failure(statuses: Vec<StageStatus>, kinds: &[StageKind]) -> Option<PipelineFailure> {
    let mut interrupted = false;
    for (status, &kind) in statuses.into_iter().zip(kinds) {
        match status {
            StageStatus::Failed(e) => return Some(PipelineFailure::new(kind, e)),
            StageStatus::Aborted(_) => interrupted = true,
            StageStatus::Completed => {}
        }
    }

    interrupted.then(|| PipelineFailure::new(StageKind::Source, TlError::Cancelled))
}
