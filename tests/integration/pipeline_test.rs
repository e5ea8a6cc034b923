//! End-to-end pipeline behavior with in-memory input and output.

use crate::common::{
    CaptureWriter, PoisonClient, SQL_INJECTION, ScoringClient, UnavailableClient, benign_traffic,
    event_line,
};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tl_error::{ErrorCategory, StageKind};
use tl_pipeline::{LineInput, Pipeline, PipelineBuilder};
use tl_traits::InferenceClient;
use tl_types::{InferenceConfig, PipelineConfig};
use tokio::sync::Semaphore;

fn reader(data: String) -> LineInput {
    LineInput::reader(Cursor::new(data.into_bytes()))
}

fn pipeline(
    config: PipelineConfig,
    data: String,
    client: Arc<dyn InferenceClient>,
    writer: CaptureWriter,
) -> Pipeline {
    PipelineBuilder::new(config)
        .source(reader(data))
        .deserialize()
        .infer(client)
        .classify()
        .sink(Box::new(writer))
        .build()
        .unwrap()
}

fn fast_retries() -> InferenceConfig {
    InferenceConfig::default()
        .with_max_retries(2)
        .with_backoff_ms(1, 2)
        .with_jitter(false)
}

#[tokio::test]
async fn test_end_to_end_example() {
    let mut data = String::new();
    for i in 0..10 {
        let line = match i {
            3 => "{\"timestamp\": \"not closed".to_string(),
            6 => event_line(i, &format!("GET /login?user=admin{} HTTP/1.1", SQL_INJECTION)),
            _ => event_line(i, "GET /index.html HTTP/1.1"),
        };
        data.push_str(&line);
        data.push('\n');
    }

    let config = PipelineConfig::default()
        .with_pipeline_batch_size(4)
        .with_inference_threshold(0.7);
    let client = Arc::new(ScoringClient::sql_injection());
    let writer = CaptureWriter::default();
    let stats = pipeline(config, data, client.clone(), writer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(client.calls(), 3);
    assert_eq!(stats.lines_read, 10);
    assert_eq!(stats.records_skipped, 1);
    assert_eq!(stats.records_written, 9);
    assert_eq!(stats.malicious, 1);
    assert_eq!(stats.benign, 8);
    assert_eq!(stats.unknown, 0);
    assert_eq!(stats.batches.source, 3);
    assert_eq!(stats.batches.sink, 3);

    assert_eq!(writer.seqs(), vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
    let rows = writer.json();
    let malicious: Vec<u64> = rows
        .iter()
        .filter(|r| r["threat_label"] == "malicious")
        .map(|r| r["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(malicious, vec![6]);
    assert_eq!(rows[0]["threat_score"], 0.1);
    assert_eq!(rows[0]["timestamp"], "2024-05-01T12:00:00Z");
    assert!(rows[0].get("payload").is_none());
}

#[tokio::test]
async fn test_order_preserved_under_uneven_latency() {
    let config = PipelineConfig::default()
        .with_pipeline_batch_size(7)
        .with_model_max_batch_size(3)
        .with_num_worker_threads(8);

    // early payloads answer slowest so later batches overtake them
    let client = ScoringClient::new(|_| 0.2).with_delay(|payload| {
        let n: u64 = payload
            .trim_start_matches("GET /page/")
            .split(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Duration::from_millis(5 - n % 5)
    });

    let writer = CaptureWriter::default();
    let stats = pipeline(config, benign_traffic(500), Arc::new(client), writer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.records_written, 500);
    assert_eq!(writer.seqs(), (0..500).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_batch_boundaries_are_deterministic() {
    let boundaries = |writer: &CaptureWriter| -> Vec<(u64, u64)> {
        writer
            .batches
            .lock()
            .iter()
            .map(|b| (b[0].seq, b[b.len() - 1].seq))
            .collect()
    };

    let mut runs = Vec::new();
    for workers in [1, 6] {
        let config = PipelineConfig::default()
            .with_pipeline_batch_size(10)
            .with_num_worker_threads(workers);
        let writer = CaptureWriter::default();
        let client = Arc::new(ScoringClient::sql_injection());
        pipeline(config, benign_traffic(45), client, writer.clone())
            .run()
            .await
            .unwrap();
        runs.push(boundaries(&writer));
    }

    assert_eq!(runs[0], vec![(0, 9), (10, 19), (20, 29), (30, 39), (40, 44)]);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let data = format!(
        "{}\n{}\n{}\n",
        event_line(0, "at-threshold"),
        event_line(1, "below-threshold"),
        event_line(2, "above-threshold"),
    );
    let client = ScoringClient::new(|payload| match payload {
        "at-threshold" => 0.7,
        "below-threshold" => 0.7 - f64::EPSILON,
        _ => 1.0,
    });

    let writer = CaptureWriter::default();
    let config = PipelineConfig::default().with_inference_threshold(0.7);
    pipeline(config, data, Arc::new(client), writer.clone())
        .run()
        .await
        .unwrap();

    let labels: Vec<String> = writer
        .json()
        .iter()
        .map(|r| r["threat_label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["malicious", "benign", "malicious"]);
}

#[tokio::test]
async fn test_slow_sink_bounds_the_source() {
    let config = PipelineConfig::default()
        .with_pipeline_batch_size(1)
        .with_edge_buffer_size(1)
        .with_num_worker_threads(2);
    let gate = Arc::new(Semaphore::new(0));
    let writer = CaptureWriter::gated(gate.clone());

    let pipeline = pipeline(
        config,
        benign_traffic(1000),
        Arc::new(ScoringClient::sql_injection()),
        writer.clone(),
    );
    let stats = pipeline.stats().clone();
    let run = tokio::spawn(pipeline.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let emitted = stats.batches(StageKind::Source);
    assert!(emitted < 20, "source ran ahead by {} batches", emitted);
    assert!(writer.batches.lock().is_empty());

    gate.add_permits(1000);
    let snapshot = run.await.unwrap().unwrap();
    assert_eq!(snapshot.records_written, 1000);
    assert_eq!(snapshot.batches.source, 1000);
}

#[tokio::test]
async fn test_unavailable_backend_degrades_to_unknown() {
    let config = PipelineConfig::default()
        .with_pipeline_batch_size(4)
        .with_num_worker_threads(1)
        .with_inference(fast_retries().with_breaker(3, Duration::from_secs(60)));
    let client = Arc::new(UnavailableClient::default());
    let writer = CaptureWriter::default();

    let stats = pipeline(config, benign_traffic(20), client.clone(), writer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.records_written, 20);
    assert_eq!(stats.unknown, 20);
    assert_eq!(stats.records_degraded, 20);
    assert_eq!(stats.malicious + stats.benign, 0);
    assert!(writer.json().iter().all(|r| r["threat_label"] == "unknown"));

    // three exhausted chunks open the breaker; the last two never reach the backend
    assert_eq!(stats.inference.chunks_exhausted, 3);
    assert_eq!(stats.inference.circuit_rejections, 2);
    assert_eq!(client.calls.load(Ordering::Relaxed), 3 * 3);
}

#[tokio::test]
async fn test_malformed_request_stops_the_pipeline() {
    let mut data = String::new();
    for i in 0..12 {
        let payload = if i == 5 { "BOOM" } else { "GET / HTTP/1.1" };
        data.push_str(&event_line(i, payload));
        data.push('\n');
    }

    let config = PipelineConfig::default().with_pipeline_batch_size(4);
    let writer = CaptureWriter::default();
    let client = Arc::new(PoisonClient { marker: "BOOM" });
    let failure = pipeline(config, data, client, writer.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.stage, StageKind::Infer);
    assert_eq!(failure.category, ErrorCategory::FatalConfiguration);
    assert!(failure.to_string().contains("Infer stage"));

    // the batch before the fault is intact, nothing after it is written
    assert_eq!(writer.seqs(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_sink_write_failure_stops_the_pipeline() {
    let config = PipelineConfig::default()
        .with_pipeline_batch_size(1)
        .with_edge_buffer_size(1);
    let writer = CaptureWriter::failing_at(5);

    let run = pipeline(
        config,
        benign_traffic(300),
        Arc::new(ScoringClient::sql_injection()),
        writer.clone(),
    )
    .run();
    let failure = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("pipeline hung after the sink failed")
        .unwrap_err();

    assert_eq!(failure.stage, StageKind::Sink);
    assert_eq!(failure.category, ErrorCategory::FatalIo);
    assert!(failure.to_string().contains("disk full"));
    assert_eq!(writer.seqs(), (0..5).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_all_malformed_batch_keeps_its_slot() {
    let mut data = benign_traffic(2);
    data.push_str("garbage\n{}\n");
    data.push_str(&benign_traffic(2));

    let config = PipelineConfig::default().with_pipeline_batch_size(2);
    let writer = CaptureWriter::default();
    let client = Arc::new(ScoringClient::sql_injection());
    let stats = pipeline(config, data, client, writer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.records_skipped, 2);
    assert_eq!(stats.batches.sink, 3);
    let sizes: Vec<usize> = writer.batches.lock().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 0, 2]);
    assert_eq!(writer.seqs(), vec![0, 1, 4, 5]);
}

#[tokio::test]
async fn test_cancel_stops_a_running_pipeline() {
    let gate = Arc::new(Semaphore::new(0));
    let writer = CaptureWriter::gated(gate.clone());
    let config = PipelineConfig::default()
        .with_pipeline_batch_size(1)
        .with_edge_buffer_size(1);

    let pipeline = pipeline(
        config,
        benign_traffic(100),
        Arc::new(ScoringClient::sql_injection()),
        writer,
    );
    let cancel = pipeline.cancel_handle();
    let run = tokio::spawn(pipeline.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    gate.add_permits(100);

    let failure = run.await.unwrap().unwrap_err();
    assert_eq!(failure.category, ErrorCategory::Cancelled);
}
