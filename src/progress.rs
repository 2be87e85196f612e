//! Progress-callback trait for per-stage parsing events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParserConfigBuilder::progress_callback`] to receive
//! events as an image moves through the pipeline.
//!
//! # Example
//!
//! ```rust
//! use invoice2json::{ParseProgressCallback, ParserConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, input: &str, stage: Stage, elapsed_ms: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{input}: {stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = ParserConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;

/// Called by the pipeline as it enters and leaves each stage.
///
/// With [`crate::parse::parse_batch`] several inputs are in flight at once,
/// so methods may be called concurrently. All methods default to no-ops.
pub trait ParseProgressCallback: Send + Sync {
    /// Before a stage starts.
    ///
    /// # Arguments
    /// * `input`: path, URL or label of the image being parsed
    /// * `stage`: the stage about to run
    fn on_stage_start(&self, input: &str, stage: Stage) {
        let _ = (input, stage);
    }

    /// After a stage succeeds.
    fn on_stage_complete(&self, input: &str, stage: Stage, elapsed_ms: u64) {
        let _ = (input, stage, elapsed_ms);
    }

    /// When a stage fails. No later stage runs for this input.
    fn on_stage_error(&self, input: &str, stage: Stage, error: &str) {
        let _ = (input, stage, error);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParserConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;
