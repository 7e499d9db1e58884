//! Progress-callback trait for per-page, per-phase run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the driver moves pages through the service.
//!
//! Callers can forward events to a terminal progress bar, a channel, or a
//! database row without the library knowing how the host application
//! communicates. The same events are also emitted as `tracing` logs, so a
//! callback is only needed for custom presentation.
//!
//! # Example
//!
//! ```rust
//! use ocr_batch::{PipelineConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl RunProgressCallback for Counter {
//!     fn on_page_processed(&self, page: usize, total: usize, result_len: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page}/{total} done ({result_len} bytes), {done} this run");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::driver::RunSummary;
use std::fmt;
use std::sync::Arc;

/// The two halves of a batch round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Upload every unsubmitted page of the batch.
    Submit,
    /// Poll, fetch and store every submitted page of the batch.
    Download,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Submit => "submit",
            Phase::Download => "download",
        })
    }
}

/// Called by [`crate::driver::BatchDriver`] as the run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The driver is sequential, so calls never overlap,
/// but the trait is `Send + Sync` so implementations can be shared with
/// other tasks.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after the log is loaded and checked against the source.
    ///
    /// # Arguments
    /// * `total_pages`   — pages in the document
    /// * `pending_pages` — pages not yet processed (including resumed ones)
    fn on_run_start(&self, total_pages: usize, pending_pages: usize) {
        let _ = (total_pages, pending_pages);
    }

    /// Called when a batch round begins.
    fn on_batch_start(&self, pages: &[usize]) {
        let _ = pages;
    }

    /// Called when one phase of the current batch begins, with the pages
    /// that phase will touch.
    fn on_phase_start(&self, phase: Phase, pages: &[usize]) {
        let _ = (phase, pages);
    }

    /// Called after a page upload has been checkpointed.
    fn on_page_submitted(&self, page: usize, total_pages: usize, remote_id: &str) {
        let _ = (page, total_pages, remote_id);
    }

    /// Called after a page result has been stored and checkpointed.
    ///
    /// # Arguments
    /// * `result_len` — byte length of the downloaded result
    fn on_page_processed(&self, page: usize, total_pages: usize, result_len: usize) {
        let _ = (page, total_pages, result_len);
    }

    /// Called once when every page is processed.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
