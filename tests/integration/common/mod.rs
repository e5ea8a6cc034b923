//! Common utilities for integration tests.
//!
//! Scripted inference clients, capturing writers and traffic generation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tl_error::{InferenceError, SinkError};
use tl_inference::decode_tokens;
use tl_traits::{InferenceClient, RecordWriter};
use tl_types::{FeatureVector, RenderedLine};
use tokio::sync::Semaphore;

pub const SQL_INJECTION: &str = "' OR '1'='1";

/// One traffic line with the given payload.
pub fn event_line(i: usize, payload: &str) -> String {
    serde_json::json!({
        "timestamp": format!("2024-05-01T12:{:02}:{:02}", (i / 60) % 60, i % 60),
        "src_ip": format!("192.168.1.{}", i % 250 + 1),
        "dst_ip": "10.0.0.1",
        "src_port": 40000 + (i % 20000) as u16,
        "dst_port": 80,
        "protocol": "TCP",
        "payload": payload,
    })
    .to_string()
}

/// `count` benign lines, newline terminated.
pub fn benign_traffic(count: usize) -> String {
    (0..count)
        .map(|i| format!("{}\n", event_line(i, &format!("GET /page/{} HTTP/1.1", i))))
        .collect()
}

/// Decodes each feature vector back to its (possibly truncated) payload.
pub fn payloads(features: &[FeatureVector]) -> Vec<String> {
    features.iter().map(|f| decode_tokens(f.tokens())).collect()
}

/// Scores payloads with a fixed function, optionally after a delay.
pub struct ScoringClient {
    score: Box<dyn Fn(&str) -> f64 + Send + Sync>,
    delay: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    calls: AtomicU64,
}

impl ScoringClient {
    pub fn new(score: impl Fn(&str) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            score: Box::new(score),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicU64::new(0),
        }
    }

    /// 0.9 for SQL injection payloads, 0.1 for everything else.
    pub fn sql_injection() -> Self {
        Self::new(|payload| if payload.contains(SQL_INJECTION) { 0.9 } else { 0.1 })
    }

    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InferenceClient for ScoringClient {
    async fn infer(&self, features: &[FeatureVector]) -> Result<Vec<f64>, InferenceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let payloads = payloads(features);
        if let Some(first) = payloads.first() {
            let delay = (self.delay)(first);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(payloads.iter().map(|p| (self.score)(p)).collect())
    }

    fn name(&self) -> &str {
        "scoring"
    }
}

/// Always fails with a transient error.
#[derive(Default)]
pub struct UnavailableClient {
    pub calls: AtomicU64,
}

#[async_trait]
impl InferenceClient for UnavailableClient {
    async fn infer(&self, _features: &[FeatureVector]) -> Result<Vec<f64>, InferenceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(InferenceError::Transient("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Rejects any chunk containing `marker` as a malformed request.
pub struct PoisonClient {
    pub marker: &'static str,
}

#[async_trait]
impl InferenceClient for PoisonClient {
    async fn infer(&self, features: &[FeatureVector]) -> Result<Vec<f64>, InferenceError> {
        let payloads = payloads(features);
        if payloads.iter().any(|p| p.contains(self.marker)) {
            return Err(InferenceError::Malformed(format!(
                "request rejected: {}",
                self.marker
            )));
        }
        Ok(vec![0.1; payloads.len()])
    }

    fn name(&self) -> &str {
        "poison"
    }
}

/// Captures written lines in memory, one entry per batch.
///
/// With a gate, every batch waits for a permit first.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    pub batches: Arc<Mutex<Vec<Vec<RenderedLine>>>>,
    gate: Option<Arc<Semaphore>>,
    fail_at: Option<usize>,
}

impl CaptureWriter {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            batches: Arc::default(),
            gate: Some(gate),
            fail_at: None,
        }
    }

    /// Accepts `batches` batches, then fails every write.
    pub fn failing_at(batches: usize) -> Self {
        Self {
            fail_at: Some(batches),
            ..Self::default()
        }
    }

    pub fn lines(&self) -> Vec<RenderedLine> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.lines().iter().map(|l| l.seq).collect()
    }

    pub fn json(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .map(|l| serde_json::from_str(&l.json).unwrap())
            .collect()
    }
}

#[async_trait]
impl RecordWriter for CaptureWriter {
    async fn write_batch(&mut self, lines: &[RenderedLine]) -> tl_error::Result<u64> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let mut batches = self.batches.lock();
        if self.fail_at == Some(batches.len()) {
            return Err(SinkError::Write("disk full".to_string()).into());
        }
        batches.push(lines.to_vec());
        Ok(lines.iter().map(|l| l.json.len() as u64 + 1).sum())
    }

    async fn finish(&mut self) -> tl_error::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "capture".to_string()
    }
}
