//! Bounded fetcher.
//!
//! Streams a remote body into a [`StagingFile`] under two live ceilings: a
//! byte count and a wall-clock duration. A server that lies about its
//! content length, or trickles bytes, is still cut off. Any abort releases
//! the staging file before returning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{ByteStream, MediaSource, SourceError};
use super::staging::{StagingArea, StagingError, StagingFile};

/// Errors that end a fetch. The staging file is already gone when one is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("media exceeds the {limit} byte ceiling")]
    TooLarge { limit: u64 },

    #[error("download exceeded its {budget:?} time budget")]
    Timeout { budget: Duration },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("staging storage failure: {0}")]
    Storage(String),
}

impl From<SourceError> for TransferError {
    fn from(err: SourceError) -> Self {
        Self::NetworkFailure(err.to_string())
    }
}

impl From<StagingError> for TransferError {
    fn from(err: StagingError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// The two ceilings applied to one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub max_duration: Duration,
}

impl FetchLimits {
    pub fn new(max_bytes: u64, max_duration: Duration) -> Self {
        Self {
            max_bytes,
            max_duration,
        }
    }
}

#[derive(Clone)]
pub struct BoundedFetcher {
    source: Arc<dyn MediaSource>,
    staging: StagingArea,
}

impl BoundedFetcher {
    pub fn new(source: Arc<dyn MediaSource>, staging: StagingArea) -> Self {
        Self { source, staging }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Download `url` into a fresh staging file.
    pub async fn fetch(
        &self,
        url: &str,
        extension: &str,
        limits: FetchLimits,
        cancel: &CancellationToken,
    ) -> Result<StagingFile, TransferError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + limits.max_duration;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TransferError::Timeout { budget: limits.max_duration });
            }
            opened = self.source.open(url) => opened?,
        };

        if let Some(declared) = response.content_length {
            if declared > limits.max_bytes {
                info!(
                    declared,
                    limit = limits.max_bytes,
                    "declared content length exceeds ceiling; not reading body"
                );
                return Err(TransferError::TooLarge {
                    limit: limits.max_bytes,
                });
            }
        }

        let mut file = self.staging.acquire(extension).await?;
        match stream_into(&mut file, response.body, limits, started, deadline, cancel).await {
            Ok(()) => {
                debug!(
                    bytes = file.bytes_written(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch complete"
                );
                Ok(file)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    bytes = file.bytes_written(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch aborted"
                );
                file.release().await;
                Err(e)
            }
        }
    }
}

async fn stream_into(
    file: &mut StagingFile,
    mut body: ByteStream,
    limits: FetchLimits,
    started: Instant,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let timeout = || TransferError::Timeout {
        budget: limits.max_duration,
    };

    loop {
        // The deadline also covers a read that never returns.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timeout()),
            next = body.next() => next,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e.into()),
        };

        if started.elapsed() > limits.max_duration {
            return Err(timeout());
        }
        if file.bytes_written() + chunk.len() as u64 > limits.max_bytes {
            return Err(TransferError::TooLarge {
                limit: limits.max_bytes,
            });
        }
        file.write_chunk(&chunk).await?;
    }

    file.finish().await?;
    Ok(())
}
