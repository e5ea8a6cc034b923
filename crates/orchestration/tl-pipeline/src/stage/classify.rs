//! Classify stage: thresholds scores and renders output lines.

use super::{StageContext, StageExit, StageResult, unexpected_payload};
use crate::edge::{AbortReason, EdgeReceiver, EdgeSender, Frame};
use chrono::SecondsFormat;
use glob::Pattern;
use serde_json::{Map, Value};
use tl_error::{Result, StageKind, TlError};
use tl_types::{
    Batch, Payload, PayloadKind, Record, RenderedLine, SerializeConfig, ThreatLabel,
};
use tracing::debug;

/// Fields an output line may contain, in render order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Seq,
    Timestamp,
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
    Protocol,
    Payload,
    Label,
    ThreatScore,
    ThreatLabel,
}

const FIELDS: [Field; 11] = [
    Field::Seq,
    Field::Timestamp,
    Field::SrcIp,
    Field::DstIp,
    Field::SrcPort,
    Field::DstPort,
    Field::Protocol,
    Field::Payload,
    Field::Label,
    Field::ThreatScore,
    Field::ThreatLabel,
];

/// Renders records as JSON lines with a fixed field selection.
#[derive(Debug, Clone)]
pub struct Renderer {
    /// Selected fields with their output key, in render order
    fields: Vec<(Field, String)>,
}

impl Renderer {
    /// Compiles the include/exclude patterns of `config`.
    pub fn from_config(config: &SerializeConfig) -> Result<Self> {
        let include = compile(&config.include_patterns())?;
        let exclude = compile(&config.exclude)?;

        let fields = FIELDS
            .iter()
            .map(|&field| (field, key(field, config)))
            .filter(|(_, key)| {
                include.iter().any(|p| p.matches(key)) && !exclude.iter().any(|p| p.matches(key))
            })
            .collect();

        Ok(Self { fields })
    }

    /// Output keys, in render order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, key)| key.as_str())
    }

    /// Renders one record. Absent values are omitted.
    pub fn render(&self, record: &Record) -> String {
        let event = &record.event;
        let mut object = Map::with_capacity(self.fields.len());

        for (field, key) in &self.fields {
            let value = match field {
                Field::Seq => Some(Value::from(record.seq)),
                Field::Timestamp => Some(Value::from(
                    event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                )),
                Field::SrcIp => Some(Value::from(event.src_ip.as_str())),
                Field::DstIp => Some(Value::from(event.dst_ip.as_str())),
                Field::SrcPort => Some(Value::from(event.src_port)),
                Field::DstPort => Some(Value::from(event.dst_port)),
                Field::Protocol => Some(Value::from(event.protocol.as_str())),
                Field::Payload => Some(Value::from(event.payload.as_str())),
                Field::Label => event.label.as_deref().map(Value::from),
                Field::ThreatScore => record.score.map(Value::from),
                Field::ThreatLabel => record.label.map(|l| Value::from(l.as_str())),
            };
            if let Some(value) = value {
                object.insert(key.clone(), value);
            }
        }

        Value::Object(object).to_string()
    }
}

fn key(field: Field, config: &SerializeConfig) -> String {
    match field {
        Field::Seq => "seq".to_string(),
        Field::Timestamp => "timestamp".to_string(),
        Field::SrcIp => "src_ip".to_string(),
        Field::DstIp => "dst_ip".to_string(),
        Field::SrcPort => "src_port".to_string(),
        Field::DstPort => "dst_port".to_string(),
        Field::Protocol => "protocol".to_string(),
        Field::Payload => "payload".to_string(),
        Field::Label => "label".to_string(),
        Field::ThreatScore => config.score_field(),
        Field::ThreatLabel => config.label_field(),
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| TlError::Config(format!("Invalid field pattern '{}': {}", p, e)))
        })
        .collect()
}

/// Applies the inclusive threshold to a scored record.
///
/// Records already marked `unknown` keep that label; records that never got
/// a score become `unknown`.
pub(crate) fn classify(record: &mut Record, threshold: f64) {
    if record.is_unknown() {
        return;
    }
    record.label = Some(match record.score {
        Some(score) => ThreatLabel::from_score(score, threshold),
        None => ThreatLabel::Unknown,
    });
}

/// Labels records and renders them for the sink.
#[derive(Debug, Default)]
pub struct ClassifyStage;

impl ClassifyStage {
    pub fn new() -> Self {
        Self
    }

    pub(super) async fn run(
        self,
        input: &mut EdgeReceiver,
        output: &mut EdgeSender,
        ctx: &StageContext,
    ) -> StageResult {
        let threshold = ctx.config.inference_threshold;
        let renderer = Renderer::from_config(&ctx.config.serialize)?;

        loop {
            let batch = match input.recv().await {
                Frame::Batch(batch) => batch,
                Frame::End => return Ok(StageExit::Completed),
                Frame::Abort(reason) => return Ok(StageExit::Aborted(reason)),
            };

            let records = match batch.payload {
                Payload::Records(records) => records,
                other => {
                    return Err(unexpected_payload(
                        StageKind::Classify,
                        PayloadKind::Records,
                        other.kind(),
                    ));
                }
            };

            let (mut malicious, mut benign, mut unknown) = (0, 0, 0);
            let lines: Vec<RenderedLine> = records
                .into_iter()
                .map(|mut record| {
                    classify(&mut record, threshold);
                    match record.label {
                        Some(ThreatLabel::Malicious) => malicious += 1,
                        Some(ThreatLabel::Benign) => benign += 1,
                        _ => unknown += 1,
                    }
                    RenderedLine {
                        seq: record.seq,
                        json: renderer.render(&record),
                    }
                })
                .collect();

            ctx.stats.record_labels(malicious, benign, unknown);
            debug!(
                batch_id = batch.id,
                malicious = malicious,
                benign = benign,
                unknown = unknown,
                "Classified batch"
            );

            if output.send_batch(Batch::rendered(batch.id, lines)).await.is_err() {
                return Ok(StageExit::Aborted(AbortReason::DownstreamClosed));
            }
            ctx.stats.record_batch(StageKind::Classify);
        }
    }
}
