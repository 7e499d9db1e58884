//! The batch driver: moves every page through `unsubmitted → submitted →
//! processed`, checkpointing after each step.
//!
//! ## Rounds
//!
//! Each round takes the first `batch_size` pages that are not processed and
//! runs two phases over them:
//!
//! 1. **Submit** — upload every page of the batch that has no remote id yet,
//!    checkpointing each id as soon as it is known.
//! 2. **Download** — for every submitted page of the batch, poll until ready,
//!    fetch, hand to the sink, checkpoint `processed`.
//!
//! Uploading the whole batch before polling lets the service work on all of
//! its pages while we wait on the first one.
//!
//! ## Resuming
//!
//! The log is the only state. A page recorded as `submitted` by an earlier,
//! interrupted run goes straight to the download phase with its recorded
//! remote id; it is never uploaded again.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::log::{ProcessingLog, UnitStatus};
use crate::pipeline::service::{OcrService, RemoteStatus};
use crate::pipeline::sink::ResultSink;
use crate::pipeline::source::{PageBlob, PageSource};
use crate::pipeline::transport::{TransportClient, TransportStats};
use crate::progress::Phase;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info};

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages already processed when the run started.
    pub already_processed: usize,
    /// Pages uploaded during this run.
    pub submitted: usize,
    /// Pages downloaded and stored during this run.
    pub processed: usize,
    /// Batch rounds executed.
    pub batches: usize,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Retry and rate-limit counters.
    pub transport: TransportStats,
}

/// Drives one document to completion against one processing log.
pub struct BatchDriver {
    client: TransportClient,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn ResultSink>,
    log: ProcessingLog,
    config: PipelineConfig,
}

impl BatchDriver {
    pub fn new(
        service: Arc<dyn OcrService>,
        source: Arc<dyn PageSource>,
        sink: Arc<dyn ResultSink>,
        log: ProcessingLog,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client: TransportClient::new(service, &config),
            source,
            sink,
            log,
            config,
        }
    }

    pub fn log(&self) -> &ProcessingLog {
        &self.log
    }

    pub fn into_log(self) -> ProcessingLog {
        self.log
    }

    /// Run rounds until every page is processed.
    ///
    /// # Errors
    /// [`PipelineError::InvalidConfig`] before any work if the configuration
    /// was assembled by hand with a zero batch size or budget. After that,
    /// the first fatal error ends the run. Everything checkpointed before it
    /// stays in the log, so calling `run` again (or restarting the process)
    /// resumes from there.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;
        let start = Instant::now();
        let total = self.source.page_count();

        if let Some(highest) = self.log.highest_index() {
            if highest > total {
                return Err(PipelineError::LogMismatch { highest, total });
            }
        }

        let mut summary = RunSummary {
            total_pages: total,
            already_processed: self.log.counts(total).processed,
            ..RunSummary::default()
        };
        let pending = self.log.pending(total);
        info!(
            "Total pages: {}, already processed: {}, pending: {}",
            total,
            summary.already_processed,
            pending.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(total, pending.len());
        }

        loop {
            let pending = self.log.pending(total);
            if pending.is_empty() {
                break;
            }

            let batch: Vec<usize> = pending
                .into_iter()
                .take(self.config.batch_size)
                .collect();
            summary.batches += 1;
            info!(
                "Processing batch {}: pages {:?}",
                summary.batches, batch
            );
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_batch_start(&batch);
            }

            summary.submitted += self.submit_phase(&batch, total).await?;
            summary.processed += self.download_phase(&batch, total).await?;
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary.transport = self.client.stats();
        info!(
            "All pages processed: {} submitted and {} downloaded this run in {}ms",
            summary.submitted, summary.processed, summary.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(&summary);
        }
        Ok(summary)
    }

    /// Upload the unsubmitted pages of `batch`. Returns how many were uploaded.
    async fn submit_phase(&mut self, batch: &[usize], total: usize) -> Result<usize, PipelineError> {
        let to_submit: Vec<usize> = batch
            .iter()
            .copied()
            .filter(|p| self.log.status(*p) == UnitStatus::Unsubmitted)
            .collect();
        if to_submit.is_empty() {
            return Ok(0);
        }

        debug!("{} phase: pages {:?}", Phase::Submit, to_submit);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_start(Phase::Submit, &to_submit);
        }

        for &page in &to_submit {
            info!("Uploading page {}", page);
            let blob = self.load_page(page).await?;
            let remote_id = self
                .client
                .submit(&blob)
                .await
                .map_err(|source| PipelineError::Submit { page, source })?;

            self.log.set_submitted(page, remote_id.as_str())?;
            info!("Page {} submitted as {}", page, remote_id);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_page_submitted(page, total, &remote_id);
            }
        }
        Ok(to_submit.len())
    }

    /// Poll, fetch and store the submitted pages of `batch`. Returns how many
    /// were processed.
    async fn download_phase(
        &mut self,
        batch: &[usize],
        total: usize,
    ) -> Result<usize, PipelineError> {
        let to_download: Vec<(usize, String)> = batch
            .iter()
            .filter_map(|&p| match self.log.entry(p) {
                Some(entry) if entry.status == UnitStatus::Submitted => {
                    Some((p, entry.remote_id.clone()))
                }
                _ => None,
            })
            .collect();
        if to_download.is_empty() {
            return Ok(0);
        }

        let pages: Vec<usize> = to_download.iter().map(|(p, _)| *p).collect();
        debug!("{} phase: pages {:?}", Phase::Download, pages);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_start(Phase::Download, &pages);
        }

        for (page, remote_id) in &to_download {
            let page = *page;
            info!("Downloading page {} ({})", page, remote_id);
            self.wait_until_ready(page, remote_id).await?;

            let result = self
                .client
                .fetch_result(remote_id)
                .await
                .map_err(|source| PipelineError::Fetch {
                    page,
                    remote_id: remote_id.clone(),
                    source,
                })?;
            self.sink.accept(page, &result)?;
            self.log.set_processed(page)?;

            info!("Page {} processed ({} bytes)", page, result.len());
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_page_processed(page, total, result.len());
            }
        }
        Ok(to_download.len())
    }

    /// Poll on a fixed interval until the service reports the page ready.
    async fn wait_until_ready(&self, page: usize, remote_id: &str) -> Result<(), PipelineError> {
        let max = self.config.max_poll_attempts;
        for attempt in 1..=max {
            let status = self
                .client
                .poll_status(remote_id)
                .await
                .map_err(|source| PipelineError::Poll {
                    page,
                    remote_id: remote_id.to_string(),
                    source,
                })?;

            match status {
                RemoteStatus::Ready => {
                    debug!("Page {} ready after {} status checks", page, attempt);
                    return Ok(());
                }
                RemoteStatus::Pending => {
                    debug!("Page {} pending ({}/{})", page, attempt, max);
                    if attempt < max {
                        sleep(self.config.poll_interval).await;
                    }
                }
            }
        }

        Err(PipelineError::PollTimeout {
            page,
            remote_id: remote_id.to_string(),
            attempts: max,
        })
    }

    /// Extract one page on the blocking pool.
    async fn load_page(&self, page: usize) -> Result<PageBlob, PipelineError> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.page(page))
            .await
            .map_err(|e| PipelineError::Internal(format!("Page task panicked: {e}")))?
    }
}

/// Load the log at `log_path` and drive `source` to completion.
///
/// Convenience wrapper around [`BatchDriver`] for callers that do not need
/// the log afterwards.
pub async fn run(
    service: Arc<dyn OcrService>,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn ResultSink>,
    log_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunSummary, PipelineError> {
    let log = ProcessingLog::load(log_path.as_ref())?;
    BatchDriver::new(service, source, sink, log, config.clone())
        .run()
        .await
}
