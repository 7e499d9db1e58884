//! CLI binary for ocr-batch.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `ServiceConfig`, wires up a page source, a result
//! directory and the processing log, and prints progress.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ocr_batch::{
    BatchDriver, DirectoryPageSource, DirectoryResultSink, HttpOcrService, PageSource, Phase,
    PipelineConfig, ProcessingLog, ProgressCallback, RunProgressCallback, RunSummary,
    ServiceConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar counting processed pages, with a
/// log line per submitted and per processed page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Connecting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Stop the spinner and remove the bar so an error prints cleanly.
    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize, pending_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar
            .set_position(total_pages.saturating_sub(pending_pages) as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_pages} pages, {pending_pages} still to process…"
            ))
        ));
    }

    fn on_phase_start(&self, phase: Phase, pages: &[usize]) {
        let (first, last) = match (pages.first(), pages.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return,
        };
        self.bar.set_message(format!("{phase} pages {first}–{last}"));
    }

    fn on_page_submitted(&self, page: usize, total: usize, remote_id: &str) {
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  uploaded  {}",
            cyan("↑"),
            page,
            total,
            dim(remote_id),
        ));
    }

    fn on_page_processed(&self, page: usize, total: usize, result_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{result_len:>7} bytes")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} all {} pages processed  ({} uploaded, {} downloaded this run)",
            green("✔"),
            bold(&summary.total_pages.to_string()),
            summary.submitted,
            summary.processed,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a scanned PDF, resuming from ./processing_log.json if present
  ocr-batch data/tree_inventories_merged.pdf

  # Pre-split pages (page_000001.pdf, page_000002.pdf, …)
  ocr-batch --pages-dir data/pages -o data/ocr_output

  # Larger batches, slower polling
  ocr-batch --batch-size 5 --poll-interval 10 scans.pdf

  # Show how far a previous run got (no network)
  ocr-batch --status-only scans.pdf

RESUMING:
  Every upload and every download is checkpointed to the processing log
  before the next page is touched. Interrupt at any time and run the same
  command again: submitted pages are polled, never re-uploaded.

ENVIRONMENT VARIABLES:
  HWOCR_API_TOKEN         API token for the OCR service
  OCR_BATCH_BASE_URL      Documents endpoint
  OCR_BATCH_EXTRACTOR_ID  Extractor applied to every page
  PDFIUM_LIB_PATH         Path to libpdfium when not installed system-wide
  RUST_LOG                Overrides the log filter (e.g. ocr_batch=debug)

  A .env file in the working directory is loaded before parsing flags.
"#;

/// Submit document pages to an asynchronous OCR service, resumably.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-batch",
    version,
    about = "Submit document pages to an asynchronous OCR service, resumably",
    long_about = "Upload every page of a document to an asynchronous OCR service, poll for \
completion, and download each page's structured result. Progress is checkpointed to a JSON \
processing log after every step, so interrupted runs resume without re-uploading pages.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Multi-page PDF to process.
    #[arg(required_unless_present = "pages_dir", conflicts_with = "pages_dir")]
    input: Option<PathBuf>,

    /// Directory of pre-split pages named page_000001.pdf, page_000002.pdf, …
    #[arg(long, env = "OCR_BATCH_PAGES_DIR")]
    pages_dir: Option<PathBuf>,

    /// Processing log (created if absent).
    #[arg(long, env = "OCR_BATCH_LOG", default_value = "processing_log.json")]
    log: PathBuf,

    /// Directory for per-page JSON results.
    #[arg(short, long, env = "OCR_BATCH_OUTPUT_DIR", default_value = "ocr_output")]
    output_dir: PathBuf,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "OCR_BATCH_PASSWORD")]
    password: Option<String>,

    /// Pages per submit/download round.
    #[arg(long, env = "OCR_BATCH_BATCH_SIZE", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Seconds between status checks of the same page.
    #[arg(long, env = "OCR_BATCH_POLL_INTERVAL", default_value_t = 3)]
    poll_interval: u64,

    /// Pending answers tolerated per page before giving up.
    #[arg(long, env = "OCR_BATCH_MAX_POLL_ATTEMPTS", default_value_t = 120)]
    max_poll_attempts: u32,

    /// Attempts per request on transient failure, the first try included.
    #[arg(long, env = "OCR_BATCH_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Seconds between transient-failure attempts.
    #[arg(long, env = "OCR_BATCH_RETRY_DELAY", default_value_t = 3)]
    retry_delay: u64,

    /// OCR documents endpoint.
    #[arg(long, env = "OCR_BATCH_BASE_URL", default_value = ocr_batch::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Extractor applied to every uploaded page.
    #[arg(long, env = "OCR_BATCH_EXTRACTOR_ID", default_value = ocr_batch::config::DEFAULT_EXTRACTOR_ID)]
    extractor_id: String,

    /// Seconds the service keeps uploaded documents.
    #[arg(long, env = "OCR_BATCH_DELETE_AFTER", default_value_t = ocr_batch::config::DEFAULT_DELETE_AFTER_SECS)]
    delete_after: u64,

    /// API token.
    #[arg(long, env = "HWOCR_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "OCR_BATCH_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    /// Print the processing log's per-status counts and exit. No network access.
    #[arg(long)]
    status_only: bool,

    /// Output the final summary as JSON.
    #[arg(long, env = "OCR_BATCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCR_BATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_BATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_BATCH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; flags and the real environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-page feedback, so library INFO logs are
    // hidden while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.status_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let source = open_source(&cli)?;
    let log = ProcessingLog::load(&cli.log).context("Failed to load processing log")?;

    // ── Status-only mode ─────────────────────────────────────────────────
    if cli.status_only {
        let total = source.page_count();
        let counts = log.counts(total);
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&counts).context("Failed to serialise counts")?
            );
        } else {
            println!("Log:          {}", cli.log.display());
            println!("Pages:        {}", total);
            println!("Processed:    {}", counts.processed);
            println!("Submitted:    {}", counts.submitted);
            println!("Unsubmitted:  {}", counts.unsubmitted);
        }
        return Ok(());
    }

    // ── Progress ─────────────────────────────────────────────────────────
    let cli_progress = show_progress.then(CliProgressCallback::new_dynamic);
    let progress_cb: Option<ProgressCallback> = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn RunProgressCallback>);

    // ── Run ──────────────────────────────────────────────────────────────
    let result = run_pipeline(&cli, source, log, progress_cb).await;
    if let (Err(_), Some(cb)) = (&result, &cli_progress) {
        cb.clear();
    }
    let summary = result?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Processed {}/{} pages ({} uploaded, {} downloaded this run) in {}ms",
            summary.already_processed + summary.processed,
            summary.total_pages,
            summary.submitted,
            summary.processed,
            summary.duration_ms
        );
    }
    if !cli.quiet && !cli.json && summary.transport.rate_limit_waits > 0 {
        eprintln!(
            "   {}",
            dim(&format!(
                "rate limited {} times ({:.0}s waiting), {} transient retries",
                summary.transport.rate_limit_waits,
                summary.transport.rate_limited_ms as f64 / 1000.0,
                summary.transport.retries
            ))
        );
    }

    Ok(())
}

/// Build the service and sink, then drive every page to completion.
async fn run_pipeline(
    cli: &Cli,
    source: Arc<dyn PageSource>,
    log: ProcessingLog,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary> {
    let pipeline_config = build_pipeline_config(cli, progress)?;
    let service = HttpOcrService::new(build_service_config(cli)?)
        .context("Failed to create OCR client")?;
    let sink = DirectoryResultSink::create(&cli.output_dir)
        .context("Failed to prepare output directory")?;

    let mut driver = BatchDriver::new(
        Arc::new(service),
        source,
        Arc::new(sink),
        log,
        pipeline_config,
    );
    driver.run().await.with_context(|| {
        format!(
            "Run aborted; progress so far is saved in {}",
            cli.log.display()
        )
    })
}

/// Open the page source named on the command line.
fn open_source(cli: &Cli) -> Result<Arc<dyn PageSource>> {
    if let Some(ref dir) = cli.pages_dir {
        let source = DirectoryPageSource::open(dir)
            .with_context(|| format!("Failed to open page directory {}", dir.display()))?;
        return Ok(Arc::new(source));
    }

    let input = cli
        .input
        .as_ref()
        .context("An input PDF or --pages-dir is required")?;
    open_pdf(input, cli.password.clone())
}

#[cfg(feature = "pdfium")]
fn open_pdf(path: &std::path::Path, password: Option<String>) -> Result<Arc<dyn PageSource>> {
    let source = ocr_batch::PdfPageSource::open(path, password)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "pdfium"))]
fn open_pdf(path: &std::path::Path, _password: Option<String>) -> Result<Arc<dyn PageSource>> {
    anyhow::bail!(
        "Cannot split {}: built without the `pdfium` feature. Use --pages-dir instead.",
        path.display()
    )
}

/// Map CLI args to `PipelineConfig`.
fn build_pipeline_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .batch_size(cli.batch_size as usize)
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .max_poll_attempts(cli.max_poll_attempts)
        .max_attempts(cli.max_attempts)
        .retry_delay(Duration::from_secs(cli.retry_delay));

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `ServiceConfig`.
fn build_service_config(cli: &Cli) -> Result<ServiceConfig> {
    let token = cli
        .api_token
        .clone()
        .context("No API token: set HWOCR_API_TOKEN or pass --api-token")?;

    ServiceConfig::builder()
        .base_url(cli.base_url.clone())
        .api_token(token)
        .extractor_id(cli.extractor_id.clone())
        .delete_after_secs(cli.delete_after)
        .request_timeout(Duration::from_secs(cli.request_timeout))
        .build()
        .context("Invalid service configuration")
}
