//! Retry and rate-limit policy around an [`OcrService`].
//!
//! ## Policy
//!
//! * **Transient** failures (network, 5xx) are retried up to
//!   `max_attempts` in total with a fixed `retry_delay` between attempts.
//!   Worst-case stall per call with the defaults: 3 attempts × 3 s.
//! * **Rate limits** (429) are honoured for exactly the delay the service
//!   asked for, then the same call is repeated. They never consume the retry
//!   budget and are honoured indefinitely.
//! * Everything else is returned to the caller immediately.
//!
//! The client holds no per-page state; the driver owns all of it.

use crate::config::PipelineConfig;
use crate::error::TransportError;
use crate::pipeline::service::{OcrService, RemoteStatus};
use crate::pipeline::source::PageBlob;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Counters accumulated over the client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransportStats {
    /// Transient failures that were retried.
    pub retries: u64,
    /// 429 answers that were slept out.
    pub rate_limit_waits: u64,
    /// Total time spent in rate-limit sleeps.
    pub rate_limited_ms: u64,
}

pub struct TransportClient {
    service: Arc<dyn OcrService>,
    max_attempts: u32,
    retry_delay: Duration,
    retries: AtomicU64,
    rate_limit_waits: AtomicU64,
    rate_limited_ms: AtomicU64,
}

impl TransportClient {
    pub fn new(service: Arc<dyn OcrService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            retries: AtomicU64::new(0),
            rate_limit_waits: AtomicU64::new(0),
            rate_limited_ms: AtomicU64::new(0),
        }
    }

    /// Upload one page; returns its remote id.
    pub async fn submit(&self, page: &PageBlob) -> Result<String, TransportError> {
        let subject = format!("page {}", page.page);
        self.call("submit", &subject, move || self.service.submit(page))
            .await
    }

    /// One status check, no polling loop.
    pub async fn poll_status(&self, remote_id: &str) -> Result<RemoteStatus, TransportError> {
        self.call("status", remote_id, move || self.service.poll_status(remote_id))
            .await
    }

    /// Download a finished result.
    pub async fn fetch_result(&self, remote_id: &str) -> Result<Vec<u8>, TransportError> {
        self.call("fetch", remote_id, move || self.service.fetch_result(remote_id))
            .await
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            retries: self.retries.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            rate_limited_ms: self.rate_limited_ms.load(Ordering::Relaxed),
        }
    }

    async fn call<T, F, Fut>(
        &self,
        op: &str,
        subject: &str,
        mut attempt_once: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match attempt_once().await {
                Ok(value) => return Ok(value),
                Err(TransportError::RateLimited { retry_after }) => {
                    warn!(
                        "{} {}: rate limited, waiting {}s",
                        op,
                        subject,
                        retry_after.as_secs_f64()
                    );
                    self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                    self.rate_limited_ms
                        .fetch_add(retry_after.as_millis() as u64, Ordering::Relaxed);
                    sleep(retry_after).await;
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "{} {}: attempt {}/{} failed: {}; retrying in {}s",
                        op,
                        subject,
                        attempt,
                        self.max_attempts,
                        e,
                        self.retry_delay.as_secs_f64()
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    debug!("{} {}: giving up after attempt {}: {}", op, subject, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
