//! Error types for the ocr-batch library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`TransportError`] — **one remote attempt** failed. The
//!   [`crate::pipeline::transport::TransportClient`] inspects it to decide
//!   between retrying, sleeping out a rate limit, or giving up.
//!
//! * [`PipelineError`] — **fatal for the run**: corrupt log, a page the
//!   service definitively rejected, a poll that never finished. Every variant
//!   that concerns a single unit names its page so the operator knows where
//!   a re-run will pick up.
//!
//! A run never skips a unit. Skipping would leave a hole in the processing
//! log that a later run could not tell apart from a page still in flight.

use crate::log::UnitStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The outcome of a single failed call against the OCR service.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection reset, DNS failure, request timeout.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// HTTP 5xx from the service.
    #[error("service error: HTTP {status}")]
    Server { status: u16 },

    /// HTTP 429. The caller must wait `retry_after` before trying again.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// HTTP 4xx other than 429: the request itself is unacceptable.
    #[error("rejected by service: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A success response whose body could not be decoded.
    #[error("malformed response: {detail}")]
    Malformed { detail: String },

    /// The status document carried a value we do not know how to interpret.
    #[error("unrecognised document status '{status}'")]
    UnknownStatus { status: String },

    /// The service reports that processing of the document failed.
    #[error("service reports document status '{status}'")]
    RemoteFailed { status: String },
}

impl TransportError {
    /// Whether retrying the identical request can plausibly succeed.
    ///
    /// Rate limits are *not* transient in this sense: they are honoured
    /// separately and never consume the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Server { .. })
    }
}

/// All fatal errors returned by the ocr-batch library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Processing log ────────────────────────────────────────────────────
    /// The log file exists but cannot be trusted.
    #[error(
        "Processing log '{path}' is corrupt: {detail}\n\
Refusing to continue: discarding it could re-submit (and re-bill) pages.\n\
Inspect or restore the file manually."
    )]
    CorruptLog { path: PathBuf, detail: String },

    /// Reading or writing the log failed at the file-system level.
    #[error("Processing log I/O failed for '{path}': {source}")]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A status change that would break the monotonic unit lifecycle.
    #[error("Page {page}: illegal status transition {from} → {to}")]
    IllegalTransition {
        page: usize,
        from: UnitStatus,
        to: UnitStatus,
    },

    /// The log mentions pages the source does not have.
    #[error(
        "Processing log references page {highest} but the document has {total} pages.\n\
Was the log written for a different document?"
    )]
    LogMismatch { highest: usize, total: usize },

    // ── Remote service ────────────────────────────────────────────────────
    /// Upload failed after the retry budget, or was rejected outright.
    #[error("Page {page}: submission failed: {source}")]
    Submit {
        page: usize,
        #[source]
        source: TransportError,
    },

    /// A status check failed after the retry budget, or returned a terminal answer.
    #[error("Page {page} (remote id {remote_id}): status check failed: {source}")]
    Poll {
        page: usize,
        remote_id: String,
        #[source]
        source: TransportError,
    },

    /// The result download failed after the retry budget.
    #[error("Page {page} (remote id {remote_id}): result download failed: {source}")]
    Fetch {
        page: usize,
        remote_id: String,
        #[source]
        source: TransportError,
    },

    /// The service kept answering "pending" for the whole polling window.
    #[error(
        "Page {page} (remote id {remote_id}): still pending after {attempts} status checks.\n\
Re-run to resume polling; the page will not be re-submitted."
    )]
    PollTimeout {
        page: usize,
        remote_id: String,
        attempts: u32,
    },

    // ── Page source / result sink ─────────────────────────────────────────
    /// Requested page index does not exist in the source.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The page source cannot be used at all (bad directory, unreadable PDF).
    #[error("Invalid page source: {0}")]
    InvalidSource(String),

    /// Extracting a single page failed.
    #[error("Page {page}: could not extract page: {detail}")]
    SourceFailed { page: usize, detail: String },

    /// The result sink refused a downloaded result.
    #[error("Page {page}: could not store result: {detail}")]
    SinkFailed { page: usize, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The page this error concerns, if it concerns a single page.
    pub fn page(&self) -> Option<usize> {
        match self {
            Self::IllegalTransition { page, .. }
            | Self::Submit { page, .. }
            | Self::Poll { page, .. }
            | Self::Fetch { page, .. }
            | Self::PollTimeout { page, .. }
            | Self::PageOutOfRange { page, .. }
            | Self::SourceFailed { page, .. }
            | Self::SinkFailed { page, .. } => Some(*page),
            _ => None,
        }
    }
}
