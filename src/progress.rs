//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run as it moves through the stages. The web server uses this to publish
//! live status; the CLI drives a spinner from it.
//!
//! # Example
//!
//! ```rust
//! use scanbrief::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl PipelineProgressCallback for Printer {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("→ {stage}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::StageFailure;
use crate::state::Stage;
use std::sync::Arc;

/// Called by the orchestrator as a run advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. A run fires events from one task at a time, but the
/// same callback may be shared by concurrent runs.
pub trait PipelineProgressCallback: Send + Sync {
    /// A stage is about to start.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// A stage finished successfully.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// OCR finished a page.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in the document
    fn on_page_extracted(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// A transient extraction failure will be retried after `backoff_ms`.
    ///
    /// # Arguments
    /// * `attempt` — the attempt that just failed (1-indexed)
    fn on_retry(&self, attempt: u32, backoff_ms: u64, reason: &str) {
        let _ = (attempt, backoff_ms, reason);
    }

    /// The run failed; no report will be produced.
    fn on_failed(&self, failure: &StageFailure) {
        let _ = failure;
    }

    /// The run produced a report of `report_len` bytes.
    fn on_done(&self, report_len: usize) {
        let _ = report_len;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
