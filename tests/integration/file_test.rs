//! Pipelines reading and writing real files.

use crate::common::{SQL_INJECTION, ScoringClient, benign_traffic, event_line};
use async_compression::tokio::write::{GzipEncoder, ZstdEncoder};
use std::path::Path;
use std::sync::Arc;
use tl_error::{ErrorCategory, StageKind};
use tl_pipeline::{FileWriter, LineInput, PipelineBuilder, StatsSnapshot};
use tl_types::PipelineConfig;
use tokio::io::AsyncWriteExt;

async fn detect(input: &Path, output: &Path, overwrite: bool) -> StatsSnapshot {
    PipelineBuilder::new(PipelineConfig::default().with_pipeline_batch_size(8))
        .source(LineInput::file(input))
        .deserialize()
        .infer(Arc::new(ScoringClient::sql_injection()))
        .classify()
        .sink(Box::new(FileWriter::new(output, overwrite)))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap()
}

fn traffic() -> String {
    let mut data = benign_traffic(20);
    data.push_str(&event_line(20, SQL_INJECTION));
    data.push('\n');
    data
}

fn output_seqs(path: &Path) -> Vec<u64> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["seq"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_gzip_input_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("traffic.jsonl.gz");
    let output = dir.path().join("results/threats.json");

    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(traffic().as_bytes()).await.unwrap();
    encoder.shutdown().await.unwrap();
    std::fs::write(&input, encoder.into_inner()).unwrap();

    let stats = detect(&input, &output, true).await;
    assert_eq!(stats.records_written, 21);
    assert_eq!(stats.malicious, 1);
    assert_eq!(output_seqs(&output), (0..21).collect::<Vec<u64>>());

    let last = std::fs::read_to_string(&output).unwrap();
    assert!(last.lines().last().unwrap().contains(r#""threat_label":"malicious""#));
}

#[tokio::test]
async fn test_zstd_input_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("traffic.jsonl.zst");
    let output = dir.path().join("threats.json");

    let mut encoder = ZstdEncoder::new(Vec::new());
    encoder.write_all(traffic().as_bytes()).await.unwrap();
    encoder.shutdown().await.unwrap();
    std::fs::write(&input, encoder.into_inner()).unwrap();

    let stats = detect(&input, &output, true).await;
    assert_eq!(stats.records_written, 21);
    assert!(stats.bytes_written > 0);
}

#[tokio::test]
async fn test_overwrite_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("traffic.jsonl");
    let output = dir.path().join("threats.json");
    std::fs::write(&input, traffic()).unwrap();

    detect(&input, &output, true).await;
    detect(&input, &output, false).await;
    assert_eq!(output_seqs(&output).len(), 42);

    detect(&input, &output, true).await;
    assert_eq!(output_seqs(&output), (0..21).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_missing_input_is_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.json");
    std::fs::write(&output, "previous\n").unwrap();

    let failure = PipelineBuilder::new(PipelineConfig::default())
        .source(LineInput::file(dir.path().join("missing.jsonl")))
        .deserialize()
        .infer(Arc::new(ScoringClient::sql_injection()))
        .classify()
        .sink(Box::new(FileWriter::new(&output, true)))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.stage, StageKind::Source);
    assert_eq!(failure.category, ErrorCategory::FatalIo);
    // overwrite mode must not truncate on a failed run
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous\n");
}
