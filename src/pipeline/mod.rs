//! Pipeline stages for a batch run.
//!
//! Each submodule owns one boundary of the driver, so each is testable on
//! its own and replaceable without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ transport ──▶ service ──▶ transport ──▶ sink
//! (page N)   (retry/429)   (HTTP)      (poll/fetch)  (result N)
//! ```
//!
//! 1. [`source`]    — single-page blobs by 1-based index; blocking, run on
//!    tokio's blocking pool
//! 2. [`service`]   — the raw OCR API: one request per call
//! 3. [`transport`] — retry budget and rate-limit sleeps around the service;
//!    the only stage that waits on the clock
//! 4. [`sink`]      — durable storage for each page's result

pub mod service;
pub mod sink;
pub mod source;
pub mod transport;
