//! Integration tests for threatline.
//!
//! These run complete pipelines against scripted inference clients and
//! in-memory or on-disk writers.
//!
//! ```bash
//! cargo test -p integration-tests
//! ```

mod common;
mod file_test;
mod pipeline_test;
