//! Records and the values that travel with them between stages.

use crate::event::NetworkEvent;
use serde::{Deserialize, Serialize};

/// Classification assigned to a scored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLabel {
    Benign,
    Malicious,
    /// Inference could not produce a usable score
    Unknown,
}

impl ThreatLabel {
    /// Labels a score against an inclusive threshold.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Self::Malicious
        } else {
            Self::Benign
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Malicious => "malicious",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ThreatLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw input line with its ingestion sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub seq: u64,
    pub bytes: Vec<u8>,
}

impl RawLine {
    pub fn new(seq: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            bytes: bytes.into(),
        }
    }
}

/// A parsed event moving through the pipeline.
///
/// `seq` is assigned by the source and never changes; it is the ordering
/// identity checked by the sink. `score` is written once by inference and
/// `label` once by inference (degraded records) or classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub seq: u64,
    pub event: NetworkEvent,
    pub score: Option<f64>,
    pub label: Option<ThreatLabel>,
}

impl Record {
    pub fn new(seq: u64, event: NetworkEvent) -> Self {
        Self {
            seq,
            event,
            score: None,
            label: None,
        }
    }

    /// Marks the record as unscorable.
    pub fn degrade(&mut self) {
        self.score = Some(0.0);
        self.label = Some(ThreatLabel::Unknown);
    }

    /// Returns true if inference gave up on this record.
    pub fn is_unknown(&self) -> bool {
        self.label == Some(ThreatLabel::Unknown)
    }
}

/// A serialized output line, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub seq: u64,
    pub json: String,
}

/// Fixed-length token ids fed to the model.
///
/// Token `0` is padding; every other token is a payload byte plus one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureVector(pub Vec<u32>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> &[u32] {
        &self.0
    }
}
