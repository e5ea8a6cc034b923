//! Infer stage: scores records with the inference client.
//!
//! Several batches are scored at once. Each batch is encoded into feature
//! vectors, split into chunks of at most `model_max_batch_size`, and the
//! chunks are sent to the client under a shared limit of
//! `num_worker_threads` outstanding calls. Finished batches go through a
//! reorder buffer so they leave in the order they arrived.

use super::{StageContext, StageExit, StageResult, unexpected_payload};
use crate::edge::{AbortReason, EdgeReceiver, EdgeSender, Frame};
use crate::reorder::ReorderBuffer;
use crate::stats::PipelineStats;
use std::sync::Arc;
use tl_error::{InferenceError, PipelineError, StageKind, TlError};
use tl_inference::{ChunkScores, ResilientClient, encode_payload, normalize_score};
use tl_traits::InferenceClient;
use tl_types::{Batch, BatchId, FeatureVector, Payload, PayloadKind, PipelineConfig, Record};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Attaches a score (or `unknown`) to every record.
pub struct InferStage {
    client: Arc<dyn InferenceClient>,
}

impl InferStage {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    pub(super) async fn run(
        self,
        input: &mut EdgeReceiver,
        output: &mut EdgeSender,
        ctx: &StageContext,
    ) -> StageResult {
        let workers = ctx.config.num_worker_threads;
        let client = Arc::new(
            ResilientClient::new(self.client, &ctx.config.inference)
                .with_stats(ctx.stats.inference().clone()),
        );
        let permits = Arc::new(Semaphore::new(workers));

        info!(
            client = client.name(),
            workers = workers,
            chunk_size = ctx.config.model_max_batch_size,
            "Inference started"
        );

        let mut tasks: JoinSet<(BatchId, Result<Vec<Record>, InferenceError>)> = JoinSet::new();
        let mut reorder: ReorderBuffer<Vec<Record>> = ReorderBuffer::new();
        let mut upstream: Option<StageExit> = None;
        let mut failure: Option<(BatchId, InferenceError)> = None;

        loop {
            while let Some((id, records)) = reorder.pop_ready() {
                if output.send_batch(Batch::records(id, records)).await.is_err() {
                    // dropping the JoinSet aborts the remaining work
                    return Ok(StageExit::Aborted(AbortReason::DownstreamClosed));
                }
                ctx.stats.record_batch(StageKind::Infer);
            }

            if tasks.is_empty() && (failure.is_some() || upstream.is_some()) {
                break;
            }

            let admit = failure.is_none() && upstream.is_none() && reorder.in_flight() < workers;

            tokio::select! {
                frame = input.recv(), if admit => match frame {
                    Frame::Batch(batch) => {
                        let records = match batch.payload {
                            Payload::Records(records) => records,
                            other => {
                                return Err(unexpected_payload(
                                    StageKind::Infer,
                                    PayloadKind::Records,
                                    other.kind(),
                                ));
                            }
                        };

                        reorder.admit(batch.id);
                        if records.is_empty() {
                            reorder.complete(batch.id, records);
                        } else {
                            debug!(batch_id = batch.id, records = records.len(), "Scoring batch");
                            let id = batch.id;
                            let client = client.clone();
                            let permits = permits.clone();
                            let config = ctx.config.clone();
                            let stats = ctx.stats.clone();
                            tasks.spawn(async move {
                                let scored =
                                    score_batch(id, &client, &permits, &config, &stats, records)
                                        .await;
                                (id, scored)
                            });
                        }
                    }
                    Frame::End => upstream = Some(StageExit::Completed),
                    Frame::Abort(reason) => upstream = Some(StageExit::Aborted(reason)),
                },
                Some(joined) = tasks.join_next() => match joined {
                    Ok((id, Ok(records))) => reorder.complete(id, records),
                    Ok((id, Err(e))) => {
                        error!(batch_id = id, error = %e, "Fatal inference error, draining");
                        // keep the earliest failure; everything before it is still emitted
                        if failure.as_ref().is_none_or(|(failed, _)| id < *failed) {
                            failure = Some((id, e));
                        }
                    }
                    Err(join_error) => {
                        return Err(PipelineError::StageCrashed {
                            stage: StageKind::Infer,
                            reason: join_error.to_string(),
                        }
                        .into());
                    }
                },
                else => break,
            }
        }

        if let Some((id, e)) = failure {
            let discarded = reorder.held();
            if discarded > 0 {
                warn!(failed_batch = id, discarded = discarded, "Discarding batches after failure");
            }
            return Err(TlError::Inference(e));
        }

        match upstream {
            Some(exit) => Ok(exit),
            None => Ok(StageExit::Aborted(AbortReason::Disconnected)),
        }
    }
}

/// Scores every record of one batch, chunk by chunk.
async fn score_batch(
    batch_id: BatchId,
    client: &ResilientClient,
    permits: &Semaphore,
    config: &PipelineConfig,
    stats: &PipelineStats,
    mut records: Vec<Record>,
) -> Result<Vec<Record>, InferenceError> {
    let features: Vec<FeatureVector> = records
        .iter()
        .map(|r| encode_payload(&r.event.payload, config.feature_length))
        .collect();

    let chunk_size = config.model_max_batch_size;
    let calls = features.chunks(chunk_size).map(|chunk| async move {
        let _permit = permits
            .acquire()
            .await
            .map_err(|_| InferenceError::Transient("inference permits closed".to_string()))?;
        client.score_chunk(chunk).await
    });
    let results = futures::future::try_join_all(calls).await?;

    for (chunk, result) in records.chunks_mut(chunk_size).zip(results) {
        match result {
            ChunkScores::Scored(scores) => {
                for (record, raw) in chunk.iter_mut().zip(scores) {
                    match normalize_score(raw) {
                        Some(score) => {
                            record.score = Some(score);
                            stats.record_scored(1);
                        }
                        None => {
                            warn!(
                                seq = record.seq,
                                score = raw,
                                "Non-finite score, marking unknown"
                            );
                            record.degrade();
                            stats.record_degraded(1);
                        }
                    }
                }
            }
            ChunkScores::Degraded(reason) => {
                warn!(
                    batch_id = batch_id,
                    records = chunk.len(),
                    reason = %reason,
                    "Chunk degraded to unknown"
                );
                chunk.iter_mut().for_each(Record::degrade);
                stats.record_degraded(chunk.len() as u64);
            }
        }
    }

    Ok(records)
}
