//! HTTP access to the survey site.
//!
//! Stages talk to the network only through [`RemoteSource`], so tests can
//! point them at a mock server or substitute a fake entirely.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::AppError;

/// Boxed future returned by [`RemoteSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Something that can retrieve remote files and pages.
pub trait RemoteSource: Send + Sync {
    /// Streams the body of `url` into `dest`, returning bytes written.
    fn download_to<'a>(&'a self, url: &'a Url, dest: &'a Path) -> SourceFuture<'a, u64>;

    /// Remote size from a HEAD request, when the server reports one.
    fn content_length<'a>(&'a self, url: &'a Url) -> SourceFuture<'a, Option<u64>>;

    /// Fetches a page body as text.
    fn fetch_text<'a>(&'a self, url: &'a Url) -> SourceFuture<'a, String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpSource
// ─────────────────────────────────────────────────────────────────────────────

/// [`RemoteSource`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpSource {
    http: reqwest::Client,
}

impl HttpSource {
    /// Builds a client with the configured user agent and timeout.
    pub fn new(config: &FetchConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent).map_err(|e| {
            AppError::Configuration(format!("Invalid user agent '{}': {}", config.user_agent, e))
        })?;
        headers.insert(USER_AGENT, agent);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();
                debug!("[HTTP] {} {} {}ms", url.path(), status.as_u16(), duration_ms);
                if status.is_success() {
                    Ok(response)
                } else {
                    Err(status_error(url, status))
                }
            }
            Err(e) => {
                debug!("[HTTP] {} FAILED {}ms", url.path(), duration_ms);
                Err(request_error(url, e))
            }
        }
    }
}

impl RemoteSource for HttpSource {
    fn download_to<'a>(&'a self, url: &'a Url, dest: &'a Path) -> SourceFuture<'a, u64> {
        Box::pin(async move {
            let response = self.send(self.http.get(url.clone()), url).await?;

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AppError::fs(parent, e))?;
            }
            let mut file = File::create(dest).await.map_err(|e| AppError::fs(dest, e))?;

            let mut stream = response.bytes_stream();
            let mut total_bytes = 0u64;
            while let Some(chunk_result) = stream.next().await {
                let chunk = chunk_result.map_err(|e| request_error(url, e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| AppError::fs(dest, e))?;
                total_bytes += chunk.len() as u64;
            }

            file.flush().await.map_err(|e| AppError::fs(dest, e))?;
            Ok(total_bytes)
        })
    }

    fn content_length<'a>(&'a self, url: &'a Url) -> SourceFuture<'a, Option<u64>> {
        Box::pin(async move {
            let response = self.send(self.http.head(url.clone()), url).await?;
            let length = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            Ok(length)
        })
    }

    fn fetch_text<'a>(&'a self, url: &'a Url) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let response = self.send(self.http.get(url.clone()), url).await?;
            response.text().await.map_err(|e| request_error(url, e))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error classification
// ─────────────────────────────────────────────────────────────────────────────

/// True for statuses worth retrying: 408, 429 and every 5xx.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn status_error(url: &Url, status: StatusCode) -> AppError {
    if is_transient_status(status) {
        AppError::transient(url.as_str(), format!("HTTP {}", status.as_u16()))
    } else {
        AppError::RemoteRejected {
            target: url.to_string(),
            status: status.as_u16(),
        }
    }
}

/// Retries only cover failures of the connection itself: timeouts, refused
/// or dropped connections, and a body stream cut short. Redirect loops and
/// undecodable responses fail the target at once.
fn request_error(url: &Url, e: reqwest::Error) -> AppError {
    if e.is_builder() {
        AppError::Internal(format!("Invalid request for {}: {}", url, e))
    } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AppError::transient(url.as_str(), e)
    } else {
        AppError::corrupt(url.as_str(), format!("unusable response: {}", e))
    }
}
