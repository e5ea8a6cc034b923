//! Deserialize stage: parses raw lines into records.

use super::{StageContext, StageExit, StageResult, unexpected_payload};
use crate::edge::{AbortReason, EdgeReceiver, EdgeSender, Frame};
use tl_error::StageKind;
use tl_types::{Batch, NetworkEvent, Payload, PayloadKind, Record};
use tracing::debug;

/// Parses each line as a [`NetworkEvent`].
///
/// Malformed lines are dropped and counted; the batch keeps its id even if
/// nothing in it parsed.
#[derive(Debug, Default)]
pub struct DeserializeStage;

impl DeserializeStage {
    pub fn new() -> Self {
        Self
    }

    pub(super) async fn run(
        self,
        input: &mut EdgeReceiver,
        output: &mut EdgeSender,
        ctx: &StageContext,
    ) -> StageResult {
        loop {
            let batch = match input.recv().await {
                Frame::Batch(batch) => batch,
                Frame::End => return Ok(StageExit::Completed),
                Frame::Abort(reason) => return Ok(StageExit::Aborted(reason)),
            };

            let lines = match batch.payload {
                Payload::Lines(lines) => lines,
                other => {
                    return Err(unexpected_payload(
                        StageKind::Deserialize,
                        PayloadKind::Lines,
                        other.kind(),
                    ));
                }
            };

            let total = lines.len();
            let records: Vec<Record> = lines
                .into_iter()
                .filter_map(|line| match NetworkEvent::from_slice(&line.bytes) {
                    Ok(event) => Some(Record::new(line.seq, event)),
                    Err(e) => {
                        debug!(seq = line.seq, error = %e, "Skipping malformed line");
                        ctx.stats.record_skipped();
                        None
                    }
                })
                .collect();

            debug!(
                batch_id = batch.id,
                records = records.len(),
                skipped = total - records.len(),
                "Parsed batch"
            );

            if output.send_batch(Batch::records(batch.id, records)).await.is_err() {
                return Ok(StageExit::Aborted(AbortReason::DownstreamClosed));
            }
            ctx.stats.record_batch(StageKind::Deserialize);
        }
    }
}
