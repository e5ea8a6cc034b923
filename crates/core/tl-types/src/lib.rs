//! Core types for threatline.
//!
//! This crate provides the foundational types used throughout the system:
//! - [`NetworkEvent`] - One parsed line of network traffic
//! - [`Record`] - An event with its ingestion sequence, score and label
//! - [`Batch`] - An ordered group of lines, records or rendered output
//! - [`PipelineConfig`] / [`DetectorConfig`] - Immutable run configuration

pub mod batch;
pub mod config;
pub mod event;
pub mod record;

pub use batch::*;
pub use config::*;
pub use event::*;
pub use record::*;
