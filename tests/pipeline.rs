//! Driver integration tests against a scripted in-process OCR service.
//!
//! Time is paused, so every poll interval, retry delay and rate-limit wait
//! is measured exactly without slowing the suite down.

use async_trait::async_trait;
use ocr_batch::{
    BatchDriver, MemoryPageSource, MemoryResultSink, OcrService, PageBlob, PipelineConfig,
    PipelineError, ProcessingLog, RemoteStatus, RunProgressCallback, RunSummary, TransportError,
    UnitStatus,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

// ── Scripted service ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Submit(usize),
    Poll(String),
    Fetch(String),
}

/// Answers every upload with `doc-<page>` and every poll with `Ready`,
/// unless a script for that page or remote id says otherwise.
#[derive(Default)]
struct FakeService {
    calls: Mutex<Vec<Call>>,
    poll_times: Mutex<HashMap<String, Vec<Instant>>>,
    submit_script: Mutex<HashMap<usize, VecDeque<TransportError>>>,
    poll_script: Mutex<HashMap<String, VecDeque<Result<RemoteStatus, TransportError>>>>,
    never_ready: Mutex<Vec<String>>,
}

impl FakeService {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_submit(&self, page: usize, errors: Vec<TransportError>) {
        self.submit_script
            .lock()
            .unwrap()
            .insert(page, errors.into());
    }

    fn script_poll(&self, remote_id: &str, answers: Vec<Result<RemoteStatus, TransportError>>) {
        self.poll_script
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), answers.into());
    }

    fn pending_forever(&self, remote_id: &str) {
        self.never_ready.lock().unwrap().push(remote_id.to_string());
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn submits(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Submit(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn poll_times(&self, remote_id: &str) -> Vec<Instant> {
        self.poll_times
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl OcrService for FakeService {
    async fn submit(&self, page: &PageBlob) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(Call::Submit(page.page));
        let scripted = self
            .submit_script
            .lock()
            .unwrap()
            .get_mut(&page.page)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(err) => Err(err),
            None => Ok(format!("doc-{}", page.page)),
        }
    }

    async fn poll_status(&self, remote_id: &str) -> Result<RemoteStatus, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Poll(remote_id.to_string()));
        self.poll_times
            .lock()
            .unwrap()
            .entry(remote_id.to_string())
            .or_default()
            .push(Instant::now());

        if self.never_ready.lock().unwrap().iter().any(|id| id == remote_id) {
            return Ok(RemoteStatus::Pending);
        }
        self.poll_script
            .lock()
            .unwrap()
            .get_mut(remote_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(RemoteStatus::Ready))
    }

    async fn fetch_result(&self, remote_id: &str) -> Result<Vec<u8>, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Fetch(remote_id.to_string()));
        Ok(format!(r#"{{"id":"{remote_id}","text":"ok"}}"#).into_bytes())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn source(pages: usize) -> Arc<MemoryPageSource> {
    Arc::new(MemoryPageSource::from_pdf_pages(
        (1..=pages)
            .map(|p| format!("%PDF-1.7 page {p}").into_bytes())
            .collect(),
    ))
}

fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("processing_log.json")
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .batch_size(batch_size)
        .build()
        .unwrap()
}

fn driver(
    service: &Arc<FakeService>,
    pages: usize,
    sink: &Arc<MemoryResultSink>,
    dir: &TempDir,
    config: PipelineConfig,
) -> BatchDriver {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let log = ProcessingLog::load(log_path(dir)).unwrap();
    BatchDriver::new(
        service.clone(),
        source(pages),
        sink.clone(),
        log,
        config,
    )
}

fn submit(p: usize) -> Call {
    Call::Submit(p)
}
fn poll(p: usize) -> Call {
    Call::Poll(format!("doc-{p}"))
}
fn fetch(p: usize) -> Call {
    Call::Fetch(format!("doc-{p}"))
}

// ── Batching ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn batch_is_uploaded_before_any_page_is_polled() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let summary = assert_ok!(driver(&svc, 5, &sink, &dir, config(2)).run().await);

    assert_eq!(
        svc.calls(),
        vec![
            submit(1),
            submit(2),
            poll(1),
            fetch(1),
            poll(2),
            fetch(2),
            submit(3),
            submit(4),
            poll(3),
            fetch(3),
            poll(4),
            fetch(4),
            submit(5),
            poll(5),
            fetch(5),
        ]
    );
    assert_eq!(summary.total_pages, 5);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.submitted, 5);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.already_processed, 0);

    let results = sink.results();
    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(results[&3], br#"{"id":"doc-3","text":"ok"}"#.to_vec());
}

#[tokio::test(start_paused = true)]
async fn finished_log_is_persisted_with_every_page_processed() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    assert_ok!(driver(&svc, 3, &sink, &dir, config(2)).run().await);

    let reloaded = ProcessingLog::load(log_path(&dir)).unwrap();
    for page in 1..=3 {
        let entry = reloaded.entry(page).unwrap();
        assert_eq!(entry.status, UnitStatus::Processed);
        assert_eq!(entry.remote_id, format!("doc-{page}"));
    }
    assert!(reloaded.pending(3).is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_size_larger_than_document_is_one_round() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let mut driver = driver(&svc, 3, &sink, &dir, config(10));
    let summary = assert_ok!(driver.run().await);

    assert_eq!(summary.batches, 1);
    assert_eq!(driver.log().counts(3).processed, 3);
    let log = driver.into_log();
    assert_eq!(log.path(), log_path(&dir));
    assert!(log.pending(3).is_empty());
    assert_eq!(&svc.calls()[..3], &[submit(1), submit(2), submit(3)]);
}

#[tokio::test(start_paused = true)]
async fn empty_document_finishes_without_calls() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let summary = assert_ok!(driver(&svc, 0, &sink, &dir, config(2)).run().await);

    assert_eq!(summary.batches, 0);
    assert!(svc.calls().is_empty());
    assert!(sink.is_empty());
}

// ── Resuming ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn resume_polls_recorded_ids_and_never_resubmits() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        log_path(&dir),
        r#"{
            "1": {"status": "processed", "doc_id": "old-1"},
            "2": {"status": "submitted", "doc_id": "old-2"}
        }"#,
    )
    .unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let summary = assert_ok!(driver(&svc, 3, &sink, &dir, config(2)).run().await);

    assert_eq!(
        svc.calls(),
        vec![
            submit(3),
            Call::Poll("old-2".into()),
            Call::Fetch("old-2".into()),
            poll(3),
            fetch(3),
        ]
    );
    assert_eq!(summary.already_processed, 1);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.processed, 2);
    assert_eq!(sink.results().keys().copied().collect::<Vec<_>>(), vec![2, 3]);

    let reloaded = ProcessingLog::load(log_path(&dir)).unwrap();
    assert_eq!(reloaded.entry(1).unwrap().remote_id, "old-1");
    assert_eq!(reloaded.entry(2).unwrap().remote_id, "old-2");
    assert_eq!(reloaded.status(2), UnitStatus::Processed);
}

#[tokio::test(start_paused = true)]
async fn rerun_of_finished_document_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(MemoryResultSink::new());

    let first = FakeService::new();
    assert_ok!(driver(&first, 4, &sink, &dir, config(2)).run().await);

    let second = FakeService::new();
    let summary = assert_ok!(driver(&second, 4, &sink, &dir, config(2)).run().await);

    assert!(second.calls().is_empty());
    assert_eq!(summary.already_processed, 4);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.batches, 0);
}

#[tokio::test(start_paused = true)]
async fn resume_after_fatal_submit_error_converges() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(MemoryResultSink::new());

    let failing = FakeService::new();
    failing.fail_submit(
        2,
        vec![TransportError::Rejected {
            status: 400,
            body: "unsupported file".into(),
        }],
    );
    let err = assert_err!(driver(&failing, 3, &sink, &dir, config(2)).run().await);
    assert!(matches!(
        err,
        PipelineError::Submit {
            page: 2,
            source: TransportError::Rejected { status: 400, .. }
        }
    ));
    // Page 1's upload was checkpointed before page 2 failed; nothing was polled.
    assert_eq!(failing.calls(), vec![submit(1), submit(2)]);
    let after_failure = ProcessingLog::load(log_path(&dir)).unwrap();
    assert_eq!(after_failure.status(1), UnitStatus::Submitted);
    assert_eq!(after_failure.status(2), UnitStatus::Unsubmitted);

    let healthy = FakeService::new();
    let summary = assert_ok!(driver(&healthy, 3, &sink, &dir, config(2)).run().await);

    assert_eq!(healthy.submits(), vec![2, 3]);
    assert_eq!(summary.processed, 3);
    assert_eq!(sink.len(), 3);
}

// ── Polling ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn status_checks_are_spaced_by_poll_interval() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    svc.script_poll(
        "doc-1",
        vec![
            Ok(RemoteStatus::Pending),
            Ok(RemoteStatus::Pending),
            Ok(RemoteStatus::Pending),
        ],
    );
    let sink = Arc::new(MemoryResultSink::new());
    let cfg = PipelineConfig::builder()
        .batch_size(1)
        .poll_interval(Duration::from_secs(5))
        .build()
        .unwrap();

    let start = Instant::now();
    assert_ok!(driver(&svc, 1, &sink, &dir, cfg).run().await);

    let times = svc.poll_times("doc-1");
    assert_eq!(times.len(), 4);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn poll_timeout_names_the_page_and_keeps_earlier_results() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    svc.pending_forever("doc-2");
    let sink = Arc::new(MemoryResultSink::new());
    let cfg = PipelineConfig::builder()
        .batch_size(1)
        .max_poll_attempts(4)
        .build()
        .unwrap();

    let start = Instant::now();
    let err = assert_err!(driver(&svc, 3, &sink, &dir, cfg).run().await);

    match err {
        PipelineError::PollTimeout {
            page,
            remote_id,
            attempts,
        } => {
            assert_eq!(page, 2);
            assert_eq!(remote_id, "doc-2");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected PollTimeout, got {other:?}"),
    }
    assert_eq!(svc.poll_times("doc-2").len(), 4);
    // No sleep after the final pending answer.
    assert_eq!(start.elapsed(), Duration::from_secs(9));

    assert_eq!(sink.results().keys().copied().collect::<Vec<_>>(), vec![1]);
    let log = ProcessingLog::load(log_path(&dir)).unwrap();
    assert_eq!(log.status(1), UnitStatus::Processed);
    assert_eq!(log.status(2), UnitStatus::Submitted);
    assert_eq!(log.status(3), UnitStatus::Unsubmitted);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_polls_do_not_count_toward_timeout() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let wait = Duration::from_secs(20);
    let mut answers: Vec<Result<RemoteStatus, TransportError>> = (0..6)
        .map(|_| Err(TransportError::RateLimited { retry_after: wait }))
        .collect();
    answers.push(Ok(RemoteStatus::Pending));
    svc.script_poll("doc-1", answers);
    let sink = Arc::new(MemoryResultSink::new());
    let cfg = PipelineConfig::builder()
        .batch_size(1)
        .max_poll_attempts(2)
        .build()
        .unwrap();

    let start = Instant::now();
    let summary = assert_ok!(driver(&svc, 1, &sink, &dir, cfg).run().await);

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.transport.rate_limit_waits, 6);
    assert_eq!(summary.transport.rate_limited_ms, 120_000);
    // 6 × 20 s rate limit, then one 3 s poll interval after the pending answer.
    assert_eq!(start.elapsed(), Duration::from_secs(123));
    let times = svc.poll_times("doc-1");
    for pair in times[..7].windows(2) {
        assert!(pair[1] - pair[0] >= wait);
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_status_is_fatal_and_leaves_page_submitted() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    svc.script_poll(
        "doc-1",
        vec![Err(TransportError::UnknownStatus {
            status: "archived".into(),
        })],
    );
    let sink = Arc::new(MemoryResultSink::new());

    let err = assert_err!(driver(&svc, 2, &sink, &dir, config(2)).run().await);

    assert!(matches!(
        err,
        PipelineError::Poll {
            page: 1,
            source: TransportError::UnknownStatus { .. },
            ..
        }
    ));
    assert_eq!(err.page(), Some(1));
    assert!(!svc.calls().contains(&fetch(1)));
    let log = ProcessingLog::load(log_path(&dir)).unwrap();
    assert_eq!(log.status(1), UnitStatus::Submitted);
    assert_eq!(log.status(2), UnitStatus::Submitted);
}

#[tokio::test(start_paused = true)]
async fn transient_submit_failures_are_retried_once_per_page() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    svc.fail_submit(
        1,
        vec![
            TransportError::Network {
                detail: "connection reset".into(),
            },
            TransportError::Server { status: 502 },
        ],
    );
    let sink = Arc::new(MemoryResultSink::new());

    let start = Instant::now();
    let summary = assert_ok!(driver(&svc, 1, &sink, &dir, config(1)).run().await);

    assert_eq!(svc.submits(), vec![1, 1, 1]);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.transport.retries, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(6));
}

// ── Log validation ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn log_beyond_document_is_rejected_before_any_call() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        log_path(&dir),
        r#"{"5": {"status": "processed", "remote_id": "doc-5"}}"#,
    )
    .unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let err = assert_err!(driver(&svc, 3, &sink, &dir, config(2)).run().await);

    assert!(matches!(
        err,
        PipelineError::LogMismatch {
            highest: 5,
            total: 3
        }
    ));
    assert!(svc.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hand_built_zero_limits_are_rejected_before_any_call() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(MemoryResultSink::new());

    for cfg in [
        PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        },
        PipelineConfig {
            max_poll_attempts: 0,
            ..PipelineConfig::default()
        },
    ] {
        let svc = FakeService::new();
        let mut driver = driver(&svc, 1, &sink, &dir, cfg);
        let result = tokio::time::timeout(Duration::from_secs(2), driver.run())
            .await
            .expect("run must return, not spin");

        let err = assert_err!(result);
        assert!(matches!(err, PipelineError::InvalidConfig(_)), "got {err:?}");
        assert!(svc.calls().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn run_helper_loads_log_from_path() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());

    let summary = assert_ok!(
        ocr_batch::run(svc.clone(), source(2), sink.clone(), log_path(&dir), &config(2)).await
    );

    assert_eq!(summary.processed, 2);
    assert!(log_path(&dir).exists());
}

// ── Progress callbacks ───────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl RunProgressCallback for Recorder {
    fn on_run_start(&self, total_pages: usize, pending_pages: usize) {
        self.push(format!("start {total_pages} {pending_pages}"));
    }

    fn on_batch_start(&self, pages: &[usize]) {
        self.push(format!("batch {pages:?}"));
    }

    fn on_page_submitted(&self, page: usize, _total: usize, remote_id: &str) {
        self.push(format!("submitted {page} {remote_id}"));
    }

    fn on_page_processed(&self, page: usize, _total: usize, _result_len: usize) {
        self.push(format!("processed {page}"));
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.push(format!("complete {}", summary.processed));
    }
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test(start_paused = true)]
async fn progress_callback_sees_every_checkpoint() {
    let dir = TempDir::new().unwrap();
    let svc = FakeService::new();
    let sink = Arc::new(MemoryResultSink::new());
    let recorder = Arc::new(Recorder::default());
    let cfg = PipelineConfig::builder()
        .batch_size(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    assert_ok!(driver(&svc, 3, &sink, &dir, cfg).run().await);

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start 3 3",
            "batch [1, 2]",
            "submitted 1 doc-1",
            "submitted 2 doc-2",
            "processed 1",
            "processed 2",
            "batch [3]",
            "submitted 3 doc-3",
            "processed 3",
            "complete 3",
        ]
    );
}
