//! Statistics for pipeline runs.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tl_error::StageKind;
use tl_inference::{InferenceStats, InferenceStatsSnapshot};

/// Cache line size on most modern CPUs (64 bytes).
const CACHE_LINE_SIZE: usize = 64;

/// A cache-line-padded atomic counter to prevent false sharing.
///
/// Stage tasks and inference workers update different counters from
/// different threads; keeping each on its own cache line avoids coherency
/// traffic between them.
#[repr(C, align(64))]
#[derive(Debug)]
struct PaddedAtomicU64 {
    value: AtomicU64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
}

impl Default for PaddedAtomicU64 {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
        }
    }
}

impl PaddedAtomicU64 {
    #[inline]
    fn load(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }
}

fn stage_index(stage: StageKind) -> usize {
    match stage {
        StageKind::Source => 0,
        StageKind::Deserialize => 1,
        StageKind::Infer => 2,
        StageKind::Classify => 3,
        StageKind::Sink => 4,
    }
}

/// Statistics collected during a pipeline run.
///
/// Shared by every stage through an `Arc`; all updates are relaxed atomic
/// increments.
#[derive(Debug, Default)]
pub struct PipelineStats {
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,

    /// Non-blank lines read by the source
    lines_read: PaddedAtomicU64,

    /// Bytes read by the source (after decompression)
    bytes_read: PaddedAtomicU64,

    /// Lines dropped by deserialize
    records_skipped: PaddedAtomicU64,

    /// Records scored by the inference client
    records_scored: PaddedAtomicU64,

    /// Records marked unknown by inference
    records_degraded: PaddedAtomicU64,

    malicious: PaddedAtomicU64,
    benign: PaddedAtomicU64,
    unknown: PaddedAtomicU64,

    /// Records durably written by the sink
    records_written: PaddedAtomicU64,

    /// Bytes written by the sink
    bytes_written: PaddedAtomicU64,

    /// Batches emitted (or, for the sink, written) per stage
    batches: [PaddedAtomicU64; 5],

    inference: Arc<InferenceStats>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run as started with the current time.
    pub fn start(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    /// Mark the run as complete with the current time.
    pub fn complete(&self) {
        *self.completed_at.lock() = Some(Utc::now());
    }

    /// Record a line read by the source.
    pub fn record_line(&self, bytes: u64) {
        self.lines_read.add(1);
        self.bytes_read.add(bytes);
    }

    /// Record a malformed line dropped by deserialize.
    pub fn record_skipped(&self) {
        self.records_skipped.add(1);
    }

    /// Record records that received a usable score.
    pub fn record_scored(&self, count: u64) {
        self.records_scored.add(count);
    }

    /// Record records degraded to `unknown`.
    pub fn record_degraded(&self, count: u64) {
        self.records_degraded.add(count);
    }

    /// Record classification results for one batch.
    pub fn record_labels(&self, malicious: u64, benign: u64, unknown: u64) {
        self.malicious.add(malicious);
        self.benign.add(benign);
        self.unknown.add(unknown);
    }

    /// Record a batch written by the sink.
    pub fn record_written(&self, records: u64, bytes: u64) {
        self.records_written.add(records);
        self.bytes_written.add(bytes);
    }

    /// Record a batch emitted by `stage`.
    pub fn record_batch(&self, stage: StageKind) {
        self.batches[stage_index(stage)].add(1);
    }

    /// Counters shared with the inference client wrapper.
    pub fn inference(&self) -> &Arc<InferenceStats> {
        &self.inference
    }

    /// Get the number of lines read.
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load()
    }

    /// Get the number of malformed lines skipped.
    pub fn records_skipped(&self) -> u64 {
        self.records_skipped.load()
    }

    /// Get the number of records written.
    pub fn records_written(&self) -> u64 {
        self.records_written.load()
    }

    /// Get the number of batches emitted by `stage`.
    pub fn batches(&self, stage: StageKind) -> u64 {
        self.batches[stage_index(stage)].load()
    }

    /// Create a snapshot of the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: *self.started_at.lock(),
            completed_at: *self.completed_at.lock(),
            lines_read: self.lines_read.load(),
            bytes_read: self.bytes_read.load(),
            records_skipped: self.records_skipped.load(),
            records_scored: self.records_scored.load(),
            records_degraded: self.records_degraded.load(),
            malicious: self.malicious.load(),
            benign: self.benign.load(),
            unknown: self.unknown.load(),
            records_written: self.records_written.load(),
            bytes_written: self.bytes_written.load(),
            batches: BatchCounts {
                source: self.batches(StageKind::Source),
                deserialize: self.batches(StageKind::Deserialize),
                infer: self.batches(StageKind::Infer),
                classify: self.batches(StageKind::Classify),
                sink: self.batches(StageKind::Sink),
            },
            inference: self.inference.snapshot(),
        }
    }
}

/// Batches handled per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub source: u64,
    pub deserialize: u64,
    pub infer: u64,
    pub classify: u64,
    pub sink: u64,
}

/// A serializable snapshot of pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lines_read: u64,
    pub bytes_read: u64,
    pub records_skipped: u64,
    pub records_scored: u64,
    pub records_degraded: u64,
    pub malicious: u64,
    pub benign: u64,
    pub unknown: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub batches: BatchCounts,
    pub inference: InferenceStatsSnapshot,
}

impl StatsSnapshot {
    /// Get the total duration of the run.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Calculate the throughput in records per second.
    pub fn records_per_second(&self) -> Option<f64> {
        self.duration().map(|d| {
            let secs = d.num_milliseconds() as f64 / 1000.0;
            if secs > 0.0 {
                self.records_written as f64 / secs
            } else {
                0.0
            }
        })
    }
}
