//! tl-pipeline - Staged threat detection pipeline for threatline.
//!
//! A pipeline is a linear list of stages connected by bounded edges:
//!
//! ```text
//! Source -> Deserialize -> Infer -> Classify -> Sink
//! ```
//!
//! - Each stage runs as its own tokio task
//! - Edges are bounded channels; a full edge blocks the producer, never drops
//! - Batches keep their source-assigned id and travel in id order
//! - Infer scores several batches concurrently and restores order with a
//!   reorder buffer
//! - A fatal error in any stage cancels the source and is reported once as a
//!   [`PipelineFailure`](tl_error::PipelineFailure)
//!
//! # Example
//!
//! ```ignore
//! use tl_pipeline::{FileWriter, LineInput, PipelineBuilder};
//! use tl_inference::SignatureClient;
//!
//! let config = PipelineConfig::default();
//! let pipeline = PipelineBuilder::new(config.clone())
//!     .source(LineInput::file("data/network_traffic.jsonl"))
//!     .deserialize()
//!     .infer(Arc::new(SignatureClient::new(config.feature_length)))
//!     .classify()
//!     .sink(Box::new(FileWriter::new("results/threats.json", true)))
//!     .build()?;
//!
//! let stats = pipeline.run().await?;
//! eprintln!("Wrote {} records", stats.records_written);
//! ```

pub mod edge;
pub mod reorder;
pub mod runner;
pub mod stage;
pub mod stats;

pub use edge::{AbortReason, EdgeClosed, EdgeReceiver, EdgeSender, Frame, edge};
pub use reorder::ReorderBuffer;
pub use runner::{Pipeline, PipelineBuilder};
pub use stage::{
    ClassifyStage, DeserializeStage, FileWriter, InferStage, LineInput, Renderer, SinkStage,
    SourceStage, Stage, StageContext, StageStatus,
};
pub use stats::{BatchCounts, PipelineStats, StatsSnapshot};
