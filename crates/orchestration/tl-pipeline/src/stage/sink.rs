//! Sink stage and the file writer behind it.

use super::{StageContext, StageExit, StageResult, unexpected_payload};
use crate::edge::{EdgeReceiver, Frame};
use async_trait::async_trait;
use std::path::PathBuf;
use tl_error::{PipelineError, Result, SinkError, StageKind};
use tl_traits::RecordWriter;
use tl_types::{Payload, PayloadKind, RenderedLine};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Writes newline-delimited JSON to a local file.
///
/// The file is opened on first use: truncated in overwrite mode, appended to
/// otherwise. Parent directories are created as needed.
pub struct FileWriter {
    path: PathBuf,
    overwrite: bool,
    file: Option<BufWriter<File>>,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            path: path.into(),
            overwrite,
            file: None,
        }
    }

    fn open_error(&self, e: std::io::Error) -> SinkError {
        SinkError::Open {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    async fn ensure_open(&mut self) -> Result<&mut BufWriter<File>> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.open_error(e))?;
            }

            let mut options = OpenOptions::new();
            options.create(true);
            if self.overwrite {
                options.write(true).truncate(true);
            } else {
                options.append(true);
            }
            let file = options
                .open(&self.path)
                .await
                .map_err(|e| self.open_error(e))?;

            debug!(path = %self.path.display(), overwrite = self.overwrite, "Opened output file");
            self.file = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        }

        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(SinkError::Write("output file not open".to_string()).into()),
        }
    }
}

#[async_trait]
impl RecordWriter for FileWriter {
    async fn write_batch(&mut self, lines: &[RenderedLine]) -> Result<u64> {
        let file = self.ensure_open().await?;
        let mut bytes = 0u64;

        for line in lines {
            file.write_all(line.json.as_bytes())
                .await
                .map_err(|e| SinkError::Write(e.to_string()))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| SinkError::Write(e.to_string()))?;
            bytes += line.json.len() as u64 + 1;
        }

        file.flush()
            .await
            .map_err(|e| SinkError::Flush(e.to_string()))?;
        Ok(bytes)
    }

    async fn finish(&mut self) -> Result<()> {
        let file = self.ensure_open().await?;
        sync(file).await
    }

    async fn abort(&mut self) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => sync(file).await,
            None => {
                debug!(path = %self.path.display(), "Output never opened, left untouched");
                Ok(())
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

async fn sync(file: &mut BufWriter<File>) -> Result<()> {
    file.flush()
        .await
        .map_err(|e| SinkError::Flush(e.to_string()))?;
    file.get_ref()
        .sync_all()
        .await
        .map_err(|e| SinkError::Flush(e.to_string()))?;
    Ok(())
}

/// Writes rendered lines in strict sequence order.
pub struct SinkStage {
    writer: Box<dyn RecordWriter>,
}

impl SinkStage {
    pub fn new(writer: Box<dyn RecordWriter>) -> Self {
        Self { writer }
    }

    pub(super) async fn run(mut self, input: &mut EdgeReceiver, ctx: &StageContext) -> StageResult {
        info!(destination = %self.writer.describe(), "Writing output");
        let mut last_seq: Option<u64> = None;

        loop {
            let batch = match input.recv().await {
                Frame::Batch(batch) => batch,
                Frame::End => {
                    self.writer.finish().await?;
                    info!(
                        destination = %self.writer.describe(),
                        records = ctx.stats.records_written(),
                        "Output complete"
                    );
                    return Ok(StageExit::Completed);
                }
                Frame::Abort(reason) => {
                    // keep what was already written
                    if let Err(e) = self.writer.abort().await {
                        warn!(error = %e, "Failed to flush output after abort");
                    }
                    return Ok(StageExit::Aborted(reason));
                }
            };

            let lines = match batch.payload {
                Payload::Rendered(lines) => lines,
                other => {
                    return Err(unexpected_payload(
                        StageKind::Sink,
                        PayloadKind::Rendered,
                        other.kind(),
                    ));
                }
            };

            for line in &lines {
                if let Some(previous) = last_seq.filter(|&previous| line.seq <= previous) {
                    return Err(PipelineError::Ordering {
                        previous,
                        seq: line.seq,
                    }
                    .into());
                }
                last_seq = Some(line.seq);
            }

            let bytes = self.writer.write_batch(&lines).await?;
            ctx.stats.record_written(lines.len() as u64, bytes);
            ctx.stats.record_batch(StageKind::Sink);
            debug!(batch_id = batch.id, records = lines.len(), bytes = bytes, "Wrote batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{AbortReason, edge};
    use crate::stats::PipelineStats;
    use std::sync::Arc;
    use tl_error::TlError;
    use tl_types::{Batch, PipelineConfig};
    use tokio_util::sync::CancellationToken;

    fn context() -> StageContext {
        StageContext {
            config: Arc::new(PipelineConfig::default()),
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn line(seq: u64) -> RenderedLine {
        RenderedLine {
            seq,
            json: format!(r#"{{"seq":{}}}"#, seq),
        }
    }

    #[tokio::test]
    async fn test_writes_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/threats.json");
        let ctx = context();
        let (mut tx, mut rx) = edge(4);

        tx.send_batch(Batch::rendered(0, vec![line(0), line(2)])).await.unwrap();
        tx.send_batch(Batch::rendered(1, Vec::new())).await.unwrap();
        tx.send_batch(Batch::rendered(2, vec![line(5)])).await.unwrap();
        tx.end().await;

        let exit = SinkStage::new(Box::new(FileWriter::new(&path, true)))
            .run(&mut rx, &ctx)
            .await
            .unwrap();
        assert_eq!(exit, StageExit::Completed);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"seq\":0}\n{\"seq\":2}\n{\"seq\":5}\n");
        assert_eq!(ctx.stats.records_written(), 3);
        assert_eq!(ctx.stats.batches(StageKind::Sink), 3);
    }

    #[tokio::test]
    async fn test_out_of_order_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context();
        let (mut tx, mut rx) = edge(4);

        tx.send_batch(Batch::rendered(0, vec![line(3)])).await.unwrap();
        tx.send_batch(Batch::rendered(1, vec![line(3)])).await.unwrap();

        let writer = FileWriter::new(dir.path().join("o.json"), true);
        let result = SinkStage::new(Box::new(writer)).run(&mut rx, &ctx).await;
        assert!(matches!(
            result,
            Err(TlError::Pipeline(PipelineError::Ordering { previous: 3, seq: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_truncates_and_append_keeps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threats.json");
        std::fs::write(&path, "old\n").unwrap();

        let mut writer = FileWriter::new(&path, false);
        writer.write_batch(&[line(0)]).await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n{\"seq\":0}\n");

        let mut writer = FileWriter::new(&path, true);
        writer.write_batch(&[line(1)]).await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"seq\":1}\n");
    }

    #[tokio::test]
    async fn test_empty_run_still_creates_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threats.json");
        std::fs::write(&path, "stale\n").unwrap();

        let mut writer = FileWriter::new(&path, true);
        writer.finish().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_abort_keeps_written_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threats.json");
        let ctx = context();
        let (mut tx, mut rx) = edge(4);

        tx.send_batch(Batch::rendered(0, vec![line(0)])).await.unwrap();
        tx.abort(AbortReason::UpstreamFailed(StageKind::Infer)).await;

        let exit = SinkStage::new(Box::new(FileWriter::new(&path, true)))
            .run(&mut rx, &ctx)
            .await
            .unwrap();
        assert_eq!(
            exit,
            StageExit::Aborted(AbortReason::UpstreamFailed(StageKind::Infer))
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"seq\":0}\n");
    }

    #[tokio::test]
    async fn test_abort_before_any_write_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threats.json");
        std::fs::write(&path, "previous run\n").unwrap();
        let ctx = context();
        let (tx, mut rx) = edge(4);

        tx.abort(AbortReason::UpstreamFailed(StageKind::Source)).await;

        let exit = SinkStage::new(Box::new(FileWriter::new(&path, true)))
            .run(&mut rx, &ctx)
            .await
            .unwrap();
        assert_eq!(
            exit,
            StageExit::Aborted(AbortReason::UpstreamFailed(StageKind::Source))
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\n");
    }

    #[tokio::test]
    async fn test_abort_does_not_create_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threats.json");

        let mut writer = FileWriter::new(&path, true);
        writer.abort().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened as a file
        let mut writer = FileWriter::new(dir.path(), true);
        let result = writer.write_batch(&[line(0)]).await;
        assert!(matches!(result, Err(TlError::Sink(SinkError::Open { .. }))));
    }
}
