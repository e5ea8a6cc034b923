//! Output writer trait.

use async_trait::async_trait;
use tl_error::Result;
use tl_types::RenderedLine;

/// Trait for output destinations.
///
/// Writers receive lines in strictly increasing sequence order, one batch per
/// call. A returned error aborts the pipeline.
#[async_trait]
pub trait RecordWriter: Send {
    /// Writes and flushes one batch of lines.
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write_batch(&mut self, lines: &[RenderedLine]) -> Result<u64>;

    /// Flushes and syncs everything written so far.
    ///
    /// Called once at end of stream. An empty stream still produces an
    /// (empty) destination.
    async fn finish(&mut self) -> Result<()>;

    /// Flushes whatever was already written when the pipeline aborts.
    ///
    /// Must not create or truncate a destination that nothing was written to.
    async fn abort(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns a description of the destination for logging.
    fn describe(&self) -> String;
}
