//! Configuration types for a batch run.
//!
//! Two structs, split along the seam between "how we drive the work" and
//! "who we talk to":
//!
//! * [`PipelineConfig`] — batch size, polling cadence, retry budget and
//!   progress reporting. Built via [`PipelineConfigBuilder`].
//! * [`ServiceConfig`] — endpoint, credentials and extractor settings for
//!   [`crate::pipeline::service::HttpOcrService`]. Built via
//!   [`ServiceConfigBuilder`].
//!
//! Both have documented defaults so callers set only what they care about.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;

/// Default OCR endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.handwritingocr.com/api/v3/documents";

/// Default extractor applied to every uploaded page.
pub const DEFAULT_EXTRACTOR_ID: &str = "Y5mPJa5zN7";

/// Two weeks, in seconds.
pub const DEFAULT_DELETE_AFTER_SECS: u64 = 1_209_600;

/// Configuration for driving a document through the OCR service.
///
/// # Example
/// ```rust
/// use ocr_batch::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .batch_size(4)
///     .poll_interval(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_poll_attempts, 120);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Pages taken from the pending set per round. Default: 2.
    ///
    /// All pages of a batch are uploaded before any is polled.
    pub batch_size: usize,

    /// Wait between two status checks of the same page. Default: 3 s.
    pub poll_interval: Duration,

    /// Status checks answered "pending" before a page fails with
    /// [`PipelineError::PollTimeout`]. Default: 120 (six minutes at 3 s).
    ///
    /// Rate-limited answers are not counted.
    pub max_poll_attempts: u32,

    /// Attempts per remote call on transient failure, including the first.
    /// Default: 3.
    pub max_attempts: u32,

    /// Fixed wait between transient-failure attempts. Default: 3 s.
    pub retry_delay: Duration,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            poll_interval: Duration::from_secs(3),
            max_poll_attempts: 120,
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl PipelineConfig {
    /// Check the constraints [`PipelineConfigBuilder::build`] enforces.
    ///
    /// The fields are public, so a struct literal can bypass the builder;
    /// [`crate::driver::BatchDriver::run`] calls this before doing any work.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "Max poll attempts must be ≥ 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "Max attempts must be ≥ 1 (the first try counts)".into(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the HTTP OCR service.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Documents collection URL. Status lives at `{base_url}/{id}`, results
    /// at `{base_url}/{id}.json`.
    pub base_url: String,

    /// Bearer token.
    pub api_token: String,

    /// Extractor the service runs on every uploaded page.
    pub extractor_id: String,

    /// How long the service keeps uploaded documents. Default: 14 days.
    pub delete_after_secs: u64,

    /// Per-request timeout. A request that exceeds it counts as a transient
    /// network failure. Default: 120 s.
    pub request_timeout: Duration,

    /// Wait used when a 429 carries no usable `Retry-After`. Default: 3 s.
    pub default_retry_after: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: String::new(),
            extractor_id: DEFAULT_EXTRACTOR_ID.to_string(),
            delete_after_secs: DEFAULT_DELETE_AFTER_SECS,
            request_timeout: Duration::from_secs(120),
            default_retry_after: Duration::from_secs(3),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .field("extractor_id", &self.extractor_id)
            .field("delete_after_secs", &self.delete_after_secs)
            .field("request_timeout", &self.request_timeout)
            .field("default_retry_after", &self.default_retry_after)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = token.into();
        self
    }

    pub fn extractor_id(mut self, id: impl Into<String>) -> Self {
        self.config.extractor_id = id.into();
        self
    }

    pub fn delete_after_secs(mut self, secs: u64) -> Self {
        self.config.delete_after_secs = secs;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn default_retry_after(mut self, wait: Duration) -> Self {
        self.config.default_retry_after = wait;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ServiceConfig, PipelineError> {
        let c = &mut self.config;
        let trimmed = c.base_url.trim().trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(PipelineError::InvalidConfig(format!(
                "Base URL must be an HTTP/HTTPS URL, got '{}'",
                c.base_url
            )));
        }
        c.base_url = trimmed;
        if c.api_token.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "API token is required (set HWOCR_API_TOKEN)".into(),
            ));
        }
        if c.extractor_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Extractor id must not be empty".into(),
            ));
        }
        if c.request_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "Request timeout must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}
