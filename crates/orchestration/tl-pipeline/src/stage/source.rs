//! Source stage: reads lines and cuts them into batches.

use super::{StageContext, StageExit, StageResult};
use crate::edge::{AbortReason, EdgeSender};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tl_error::{SourceError, StageKind};
use tl_types::{Batch, BatchId, RawLine};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, trace};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compression of an input file, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    fn from_path(path: &Path) -> Self {
        let name = path.to_string_lossy().to_lowercase();
        if name.ends_with(".gz") || name.ends_with(".gzip") {
            Compression::Gzip
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Where the source reads lines from.
pub enum LineInput {
    /// A newline-delimited file, optionally gzip or zstd compressed
    File(PathBuf),

    /// Any buffered async reader (stdin, in-memory data)
    Reader(Box<dyn AsyncBufRead + Send + Unpin>),
}

impl LineInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Reader(_) => "<reader>".to_string(),
        }
    }
}

/// Reads raw lines, numbers them and emits fixed-size batches.
///
/// Every non-blank line gets the next sequence number starting at 0, and
/// every `pipeline_batch_size` lines form one batch, so batch boundaries
/// depend only on the input and the configured size.
pub struct SourceStage {
    input: LineInput,
}

impl SourceStage {
    pub fn new(input: LineInput) -> Self {
        Self { input }
    }

    pub(super) async fn run(self, output: &mut EdgeSender, ctx: &StageContext) -> StageResult {
        let batch_size = ctx.config.pipeline_batch_size;
        let name = self.input.describe();
        info!(input = %name, batch_size = batch_size, "Reading input");

        let (mut reader, compression) = open(self.input).await?;
        let mut buf = Vec::with_capacity(1024);
        let mut pending = Vec::with_capacity(batch_size);
        let mut next_seq: u64 = 0;
        let mut next_id: BatchId = 0;

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    info!(input = %name, lines = next_seq, "Source cancelled");
                    return Ok(StageExit::Aborted(AbortReason::Cancelled));
                }
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            let n = read.map_err(|e| read_error(&name, compression, &e))?;
            if n == 0 {
                break;
            }

            let line = trim_line_ending(&buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                trace!(after_seq = next_seq, "Skipping blank line");
                continue;
            }

            ctx.stats.record_line(n as u64);
            pending.push(RawLine::new(next_seq, line));
            next_seq += 1;

            if pending.len() >= batch_size {
                let lines = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
                if let Some(exit) = emit(output, ctx, next_id, lines).await {
                    return Ok(exit);
                }
                next_id += 1;
            }
        }

        if !pending.is_empty() {
            if let Some(exit) = emit(output, ctx, next_id, pending).await {
                return Ok(exit);
            }
            next_id += 1;
        }

        info!(input = %name, lines = next_seq, batches = next_id, "Input exhausted");
        Ok(StageExit::Completed)
    }
}

/// Sends one batch; returns the exit to take if the pipeline is stopping.
async fn emit(
    output: &mut EdgeSender,
    ctx: &StageContext,
    id: BatchId,
    lines: Vec<RawLine>,
) -> Option<StageExit> {
    debug!(batch_id = id, lines = lines.len(), "Emitting batch");
    let batch = Batch::lines(id, lines);

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Some(StageExit::Aborted(AbortReason::Cancelled)),
        sent = output.send_batch(batch) => match sent {
            Ok(()) => {
                ctx.stats.record_batch(StageKind::Source);
                None
            }
            Err(_) => Some(StageExit::Aborted(AbortReason::DownstreamClosed)),
        },
    }
}

type InputReader = Pin<Box<dyn AsyncBufRead + Send>>;

async fn open(input: LineInput) -> Result<(InputReader, Compression), SourceError> {
    match input {
        LineInput::Reader(reader) => Ok((Box::pin(reader), Compression::None)),
        LineInput::File(path) => {
            let name = path.display().to_string();
            let file = File::open(&path)
                .await
                .map_err(|e| SourceError::from_io(&name, &e))?;

            let compression = Compression::from_path(&path);
            debug!(path = %name, compression = ?compression, "Opened input file");

            let raw = BufReader::with_capacity(READ_BUFFER_SIZE, file);
            let reader: InputReader = match compression {
                Compression::None => Box::pin(raw),
                Compression::Gzip => {
                    let decoder = GzipDecoder::new(raw);
                    Box::pin(BufReader::with_capacity(READ_BUFFER_SIZE, decoder))
                }
                Compression::Zstd => {
                    let decoder = ZstdDecoder::new(raw);
                    Box::pin(BufReader::with_capacity(READ_BUFFER_SIZE, decoder))
                }
            };
            Ok((reader, compression))
        }
    }
}

/// Maps a read error; a compressed stream that fails to decode is reported
/// as a decompression error rather than plain I/O.
fn read_error(name: &str, compression: Compression, error: &std::io::Error) -> SourceError {
    use std::io::ErrorKind;

    match (compression, error.kind()) {
        (Compression::Gzip | Compression::Zstd, ErrorKind::InvalidData | ErrorKind::Other) => {
            SourceError::Decompression(format!("{:?} input '{}': {}", compression, name, error))
        }
        _ => SourceError::from_io(name, error),
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
