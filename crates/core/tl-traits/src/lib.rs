//! Traits at the edges of the threatline pipeline.
//!
//! - [`InferenceClient`] - Scores feature vectors (model server, offline scorer, mocks)
//! - [`RecordWriter`] - Durably writes rendered output lines

pub mod inference;
pub mod writer;

pub use inference::*;
pub use writer::*;
