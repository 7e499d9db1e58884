//! The OCR service seam: one raw attempt per call, no retries.
//!
//! [`OcrService`] is what [`crate::pipeline::transport::TransportClient`]
//! wraps with its retry and rate-limit policy. Keeping the raw calls behind
//! a trait lets tests script exact service behaviour (429 on the third poll,
//! a reset connection on the first upload) without a network.
//!
//! ## HTTP contract ([`HttpOcrService`])
//!
//! | Call   | Request                         | Answers                                  |
//! |--------|---------------------------------|------------------------------------------|
//! | submit | `POST {base}` multipart          | 2xx `{"id": …}`                          |
//! | status | `GET {base}/{id}`               | 202 pending, 429 wait, 2xx `{"status"}` |
//! | fetch  | `GET {base}/{id}.json`          | 2xx result body, 429 wait               |
//!
//! Every call may answer 429 with `Retry-After: <seconds>`; 5xx is treated
//! as transient, any other 4xx as a definitive rejection.

use crate::config::ServiceConfig;
use crate::error::{PipelineError, TransportError};
use crate::pipeline::source::PageBlob;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Where a submitted document stands on the service side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Still queued or being processed.
    Pending,
    /// Finished; the result can be fetched.
    Ready,
}

/// Raw operations against the OCR service. Each call is exactly one request.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Upload one page and request asynchronous extraction. Returns the
    /// remote handle.
    async fn submit(&self, page: &PageBlob) -> Result<String, TransportError>;

    /// One status check.
    async fn poll_status(&self, remote_id: &str) -> Result<RemoteStatus, TransportError>;

    /// Download the finished extraction output.
    async fn fetch_result(&self, remote_id: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
}

/// reqwest-backed client for the documents API.
#[derive(Debug, Clone)]
pub struct HttpOcrService {
    http_client: Client,
    config: ServiceConfig,
}

impl HttpOcrService {
    pub fn new(config: ServiceConfig) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_token))
            .map_err(|e| PipelineError::InvalidConfig(format!("Invalid API token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                PipelineError::InvalidConfig(format!("Failed to build HTTP client: {e}"))
            })?;

        debug!(
            base_url = %config.base_url,
            timeout = ?config.request_timeout,
            "OCR client initialized"
        );

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn status_url(&self, remote_id: &str) -> String {
        format!("{}/{}", self.config.base_url, remote_id)
    }

    fn result_url(&self, remote_id: &str) -> String {
        format!("{}/{}.json", self.config.base_url, remote_id)
    }

    /// Pass 2xx through; turn everything else into the matching error.
    async fn check(&self, response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(
            status,
            retry_after.as_deref(),
            self.config.default_retry_after,
            &body,
        ))
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn submit(&self, page: &PageBlob) -> Result<String, TransportError> {
        let part = Part::bytes(page.bytes.clone())
            .file_name(page.file_name.clone())
            .mime_str(&page.content_type)
            .map_err(|e| TransportError::Malformed {
                detail: format!("content type '{}': {e}", page.content_type),
            })?;
        let form = Form::new()
            .part("file", part)
            .text("action", "extractor")
            .text("extractor_id", self.config.extractor_id.clone())
            .text("delete_after", self.config.delete_after_secs.to_string());

        debug!("POST {} ({} bytes)", self.config.base_url, page.bytes.len());
        let response = self
            .http_client
            .post(&self.config.base_url)
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = self.check(response).await?;

        let body: SubmitResponse = response.json().await.map_err(from_reqwest)?;
        if body.id.trim().is_empty() {
            return Err(TransportError::Malformed {
                detail: "submission response carried an empty id".into(),
            });
        }
        Ok(body.id)
    }

    async fn poll_status(&self, remote_id: &str) -> Result<RemoteStatus, TransportError> {
        let url = self.status_url(remote_id);
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(from_reqwest)?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(RemoteStatus::Pending);
        }
        let response = self.check(response).await?;

        let body: StatusResponse = response.json().await.map_err(from_reqwest)?;
        match body.status {
            Some(status) => interpret_status(&status),
            None => Err(TransportError::Malformed {
                detail: "status response has no 'status' field".into(),
            }),
        }
    }

    async fn fetch_result(&self, remote_id: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.result_url(remote_id);
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = self.check(response).await?;

        let bytes = response.bytes().await.map_err(from_reqwest)?;
        Ok(bytes.to_vec())
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn from_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_decode() {
        TransportError::Malformed {
            detail: e.to_string(),
        }
    } else {
        TransportError::Network {
            detail: e.to_string(),
        }
    }
}

/// Classify a non-2xx answer.
pub fn classify_failure(
    status: StatusCode,
    retry_after: Option<&str>,
    default_retry_after: Duration,
    body: &str,
) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::RateLimited {
            retry_after: parse_retry_after(retry_after).unwrap_or(default_retry_after),
        };
    }
    if status.is_server_error() {
        return TransportError::Server {
            status: status.as_u16(),
        };
    }
    TransportError::Rejected {
        status: status.as_u16(),
        body: truncate(body, 200),
    }
}

/// `Retry-After` in delay-seconds form. HTTP-date values are not supported
/// and yield `None`.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map the `status` field of a status document.
pub fn interpret_status(status: &str) -> Result<RemoteStatus, TransportError> {
    match status.trim().to_ascii_lowercase().as_str() {
        "processed" | "completed" | "complete" => Ok(RemoteStatus::Ready),
        "new" | "queued" | "pending" | "processing" => Ok(RemoteStatus::Pending),
        "failed" | "error" => Err(TransportError::RemoteFailed {
            status: status.to_string(),
        }),
        _ => Err(TransportError::UnknownStatus {
            status: status.to_string(),
        }),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}
