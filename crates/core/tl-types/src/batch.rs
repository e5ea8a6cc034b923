//! Batches flowing along pipeline edges.

use crate::record::{RawLine, Record, RenderedLine};

/// Monotonically increasing batch identifier assigned by the source.
pub type BatchId = u64;

/// The items carried by a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw input lines (Source to Deserialize)
    Lines(Vec<RawLine>),

    /// Parsed records (Deserialize to Infer to Classify)
    Records(Vec<Record>),

    /// Output lines (Classify to Sink)
    Rendered(Vec<RenderedLine>),
}

/// Discriminant of [`Payload`], used to validate stage wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Lines,
    Records,
    Rendered,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lines => write!(f, "lines"),
            Self::Records => write!(f, "records"),
            Self::Rendered => write!(f, "rendered"),
        }
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Lines(_) => PayloadKind::Lines,
            Self::Records(_) => PayloadKind::Records,
            Self::Rendered(_) => PayloadKind::Rendered,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Lines(items) => items.len(),
            Self::Records(items) => items.len(),
            Self::Rendered(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered group of items tagged with its batch id.
///
/// Batches are never split or merged after the source creates them; every
/// stage emits them in increasing `id` order, including empty ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    pub payload: Payload,
}

impl Batch {
    pub fn lines(id: BatchId, lines: Vec<RawLine>) -> Self {
        Self {
            id,
            payload: Payload::Lines(lines),
        }
    }

    pub fn records(id: BatchId, records: Vec<Record>) -> Self {
        Self {
            id,
            payload: Payload::Records(records),
        }
    }

    pub fn rendered(id: BatchId, lines: Vec<RenderedLine>) -> Self {
        Self {
            id,
            payload: Payload::Rendered(lines),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// First and last sequence numbers in the batch, if any.
    pub fn seq_range(&self) -> Option<(u64, u64)> {
        fn bounds(mut seqs: impl DoubleEndedIterator<Item = u64>) -> Option<(u64, u64)> {
            let first = seqs.next()?;
            Some((first, seqs.next_back().unwrap_or(first)))
        }

        match &self.payload {
            Payload::Lines(items) => bounds(items.iter().map(|l| l.seq)),
            Payload::Records(items) => bounds(items.iter().map(|r| r.seq)),
            Payload::Rendered(items) => bounds(items.iter().map(|r| r.seq)),
        }
    }
}
