//! Byte sources for remote media.
//!
//! [`MediaSource`] is the seam between the pipeline and the network: a
//! metadata-only length query and a streaming body read. [`HttpSource`] is
//! the reqwest implementation; tests substitute in-memory sources.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::logging::redact::redact_secrets;

/// Default connect timeout for media hosts.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors raised by a media source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("source returned HTTP {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("body read failed: {0}")]
    Body(String),
}

impl SourceError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::Status(status.as_u16());
        }
        Self::Request(redact_secrets(&err.without_url().to_string()))
    }
}

/// Stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// An opened response: declared length (if any) plus the unread body.
pub struct SourceResponse {
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for SourceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Where media bytes come from.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Metadata-only length query. `Ok(None)` when the server does not say.
    async fn content_length(&self, url: &str, timeout: Duration)
        -> Result<Option<u64>, SourceError>;

    /// Open the body for streaming. Nothing is read until the stream is polled.
    async fn open(&self, url: &str) -> Result<SourceResponse, SourceError>;
}

/// reqwest-backed source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let client = match reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "failed to build media HTTP client with timeouts; falling back to default client"
                );
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for HttpSource {
    async fn content_length(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, SourceError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(SourceError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        // `Response::content_length` reports the body size of a HEAD
        // response (zero), so read the header directly.
        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        Ok(length)
    }

    async fn open(&self, url: &str) -> Result<SourceResponse, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(SourceError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SourceError::Body(e.without_url().to_string())))
            .boxed();

        Ok(SourceResponse {
            content_length,
            body,
        })
    }
}
