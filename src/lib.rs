//! # ocr-batch
//!
//! Drive a large multi-page document through an asynchronous, rate-limited
//! OCR service, one page per remote document, surviving crashes and
//! restarts without re-uploading (and re-paying for) a single page.
//!
//! ## Why this crate?
//!
//! Hosted OCR APIs take uploads, work on them in the background, and make you
//! poll for results. Over thousands of pages something always goes wrong: a
//! laptop sleeps, the network drops, the service answers 429 for a minute.
//! Restarting from scratch re-submits pages that were already billed;
//! skipping a failed page leaves a silent hole. This crate keeps a durable
//! per-page log and treats it as the only state, so every restart resumes
//! exactly where the last checkpoint left off.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PageSource (page N)
//!  │
//!  ├─ 1. Select   next batch of pages not yet processed (log)
//!  ├─ 2. Submit   upload each unsubmitted page, checkpoint its remote id
//!  ├─ 3. Poll     fixed-interval status checks until ready (capped)
//!  ├─ 4. Fetch    download the structured result
//!  ├─ 5. Store    hand the result to the ResultSink, checkpoint "processed"
//!  └─ 6. Repeat   until no page is left
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_batch::{
//!     BatchDriver, DirectoryPageSource, DirectoryResultSink, HttpOcrService, PipelineConfig,
//!     ProcessingLog, ServiceConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = HttpOcrService::new(
//!         ServiceConfig::builder()
//!             .api_token(std::env::var("HWOCR_API_TOKEN")?)
//!             .build()?,
//!     )?;
//!     let source = DirectoryPageSource::open("data/pages")?;
//!     let sink = DirectoryResultSink::create("data/ocr_output")?;
//!     let log = ProcessingLog::load("data/processing_log.json")?;
//!
//!     let mut driver = BatchDriver::new(
//!         Arc::new(service),
//!         Arc::new(source),
//!         Arc::new(sink),
//!         log,
//!         PipelineConfig::default(),
//!     );
//!     let summary = driver.run().await?;
//!     eprintln!("{} pages processed this run", summary.processed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `ocr-batch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | on      | [`PdfPageSource`]: split a multi-page PDF in-process |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod driver;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, ServiceConfig, ServiceConfigBuilder};
pub use driver::{run, BatchDriver, RunSummary};
pub use error::{PipelineError, TransportError};
pub use log::{LogCounts, LogEntry, ProcessingLog, UnitStatus};
pub use pipeline::service::{HttpOcrService, OcrService, RemoteStatus};
pub use pipeline::sink::{DirectoryResultSink, MemoryResultSink, ResultSink};
#[cfg(feature = "pdfium")]
pub use pipeline::source::PdfPageSource;
pub use pipeline::source::{DirectoryPageSource, MemoryPageSource, PageBlob, PageSource};
pub use pipeline::transport::{TransportClient, TransportStats};
pub use progress::{NoopProgressCallback, Phase, ProgressCallback, RunProgressCallback};
