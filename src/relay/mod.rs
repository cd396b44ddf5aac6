//! Relay uploader.
//!
//! Pushes media to the destination endpoint, either as a reference the
//! destination fetches itself or as uploaded bytes. Byte uploads go out as
//! the natural media kind first; a destination rejection (format or size,
//! not transport) gets exactly one retry as a generic document.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::media::{MediaKind, StagingFile};

/// Default timeout for a by-reference send.
pub const DEFAULT_REFERENCE_TIMEOUT_SECS: u64 = 120;

/// Default timeout for one byte upload.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The destination understood the request and refused it.
    #[error("destination rejected the media: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to read staged media: {0}")]
    Io(String),
}

impl RelayError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// How the destination should present uploaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Video,
    Audio,
    /// Generic binary attachment.
    Document,
}

impl UploadKind {
    pub fn natural(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Self::Video,
            MediaKind::Audio => Self::Audio,
        }
    }
}

impl std::fmt::Display for UploadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// One byte upload as handed to a [`Destination`].
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub path: &'a Path,
    pub file_name: String,
    pub mime_type: String,
    pub length: u64,
    pub caption: &'a str,
    pub kind: UploadKind,
}

/// The messaging endpoint media is relayed to.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Ask the destination to fetch `url` itself.
    async fn send_by_reference(
        &self,
        target: &str,
        url: &str,
        caption: &str,
        kind: MediaKind,
        timeout: Duration,
    ) -> Result<(), RelayError>;

    /// Upload a local file.
    async fn upload_file(
        &self,
        target: &str,
        upload: &UploadRequest<'_>,
        timeout: Duration,
    ) -> Result<(), RelayError>;
}

#[derive(Clone)]
pub struct RelayUploader {
    destination: Arc<dyn Destination>,
    reference_timeout: Duration,
    upload_timeout: Duration,
}

impl RelayUploader {
    pub fn new(destination: Arc<dyn Destination>) -> Self {
        Self {
            destination,
            reference_timeout: Duration::from_secs(DEFAULT_REFERENCE_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
        }
    }

    pub fn with_timeouts(mut self, reference_timeout: Duration, upload_timeout: Duration) -> Self {
        self.reference_timeout = reference_timeout;
        self.upload_timeout = upload_timeout;
        self
    }

    /// Whether the destination accepted a by-reference send.
    ///
    /// Acceptance only means no protocol-level rejection was seen.
    pub async fn send_by_reference(
        &self,
        target: &str,
        url: &str,
        caption: &str,
        kind: MediaKind,
    ) -> bool {
        let attempt = tokio::time::timeout(
            self.reference_timeout,
            self.destination
                .send_by_reference(target, url, caption, kind, self.reference_timeout),
        )
        .await;

        match attempt {
            Ok(Ok(())) => {
                info!(kind = %kind, "destination accepted media by reference");
                true
            }
            Ok(Err(e)) => {
                warn!(kind = %kind, error = %e, "by-reference send failed");
                false
            }
            Err(_) => {
                warn!(
                    kind = %kind,
                    timeout_ms = self.reference_timeout.as_millis() as u64,
                    "by-reference send timed out"
                );
                false
            }
        }
    }

    /// Upload staged bytes, falling back to a document on rejection.
    ///
    /// Does not delete the staging file.
    pub async fn send_bytes(
        &self,
        target: &str,
        file: &StagingFile,
        caption: &str,
        kind: MediaKind,
        extension: &str,
    ) -> Result<UploadKind, RelayError> {
        let natural = UploadKind::natural(kind);
        let request = UploadRequest {
            path: file.path(),
            file_name: file.file_name().to_string(),
            mime_type: kind.mime_for_extension(extension),
            length: file.bytes_written(),
            caption,
            kind: natural,
        };

        match self.upload_once(target, &request).await {
            Ok(()) => return Ok(natural),
            Err(e) if e.is_rejection() => {
                warn!(kind = %natural, error = %e, "upload rejected; retrying as document");
            }
            Err(e) => return Err(e),
        }

        let fallback = UploadRequest {
            file_name: document_file_name(kind, extension),
            mime_type: "application/octet-stream".to_string(),
            kind: UploadKind::Document,
            ..request
        };
        self.upload_once(target, &fallback).await?;
        Ok(UploadKind::Document)
    }

    async fn upload_once(&self, target: &str, request: &UploadRequest<'_>) -> Result<(), RelayError> {
        debug!(
            kind = %request.kind,
            bytes = request.length,
            file_name = %request.file_name,
            "uploading staged media"
        );
        match tokio::time::timeout(
            self.upload_timeout,
            self.destination.upload_file(target, request, self.upload_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RelayError::Transport(format!(
                "upload timed out after {}s",
                self.upload_timeout.as_secs()
            ))),
        }
    }
}

/// Generated filename for the generic-binary retry.
pub fn document_file_name(kind: MediaKind, extension: &str) -> String {
    let ext: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let ext = if ext.is_empty() {
        kind.default_extension().to_string()
    } else {
        ext.to_ascii_lowercase()
    };
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", kind, stamp, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StagingArea;
    use parking_lot::Mutex;

    /// Scripted destination: pops one result per call, records every call.
    struct ScriptedDestination {
        reference_results: Mutex<Vec<Result<(), RelayError>>>,
        upload_results: Mutex<Vec<Result<(), RelayError>>>,
        uploads: Mutex<Vec<(UploadKind, String, String)>>,
        delay: Duration,
    }

    impl ScriptedDestination {
        fn new(reference: Vec<Result<(), RelayError>>, upload: Vec<Result<(), RelayError>>) -> Self {
            Self {
                reference_results: Mutex::new(reference),
                upload_results: Mutex::new(upload),
                uploads: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Destination for ScriptedDestination {
        async fn send_by_reference(
            &self,
            _target: &str,
            _url: &str,
            _caption: &str,
            _kind: MediaKind,
            _timeout: Duration,
        ) -> Result<(), RelayError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reference_results.lock().remove(0)
        }

        async fn upload_file(
            &self,
            _target: &str,
            upload: &UploadRequest<'_>,
            _timeout: Duration,
        ) -> Result<(), RelayError> {
            self.uploads.lock().push((
                upload.kind,
                upload.file_name.clone(),
                upload.mime_type.clone(),
            ));
            self.upload_results.lock().remove(0)
        }
    }

    async fn staged(dir: &Path) -> StagingFile {
        let mut file = StagingArea::new(dir).acquire("mp4").await.unwrap();
        file.write_chunk(b"fake video bytes").await.unwrap();
        file.finish().await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_send_by_reference_accepted() {
        let dest = Arc::new(ScriptedDestination::new(vec![Ok(())], vec![]));
        let uploader = RelayUploader::new(dest);
        assert!(uploader.send_by_reference("42", "https://cdn/v.mp4", "cap", MediaKind::Video).await);
    }

    #[tokio::test]
    async fn test_send_by_reference_rejected() {
        let dest = Arc::new(ScriptedDestination::new(
            vec![Err(RelayError::Rejected("failed to get HTTP URL content".to_string()))],
            vec![],
        ));
        let uploader = RelayUploader::new(dest);
        assert!(!uploader.send_by_reference("42", "https://cdn/v.mp4", "cap", MediaKind::Video).await);
    }

    #[tokio::test]
    async fn test_send_by_reference_timeout() {
        let mut dest = ScriptedDestination::new(vec![Ok(())], vec![]);
        dest.delay = Duration::from_secs(5);
        let uploader = RelayUploader::new(Arc::new(dest))
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(1));
        assert!(!uploader.send_by_reference("42", "https://cdn/v.mp4", "cap", MediaKind::Video).await);
    }

    #[tokio::test]
    async fn test_send_bytes_natural_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let file = staged(tmp.path()).await;
        let dest = Arc::new(ScriptedDestination::new(vec![], vec![Ok(())]));
        let uploader = RelayUploader::new(dest.clone());

        let kind = uploader
            .send_bytes("42", &file, "cap", MediaKind::Video, "mp4")
            .await
            .unwrap();

        assert_eq!(kind, UploadKind::Video);
        let uploads = dest.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].2, "video/mp4");
        drop(uploads);
        file.release().await;
    }

    #[tokio::test]
    async fn test_send_bytes_rejection_retries_as_document() {
        let tmp = tempfile::tempdir().unwrap();
        let file = staged(tmp.path()).await;
        let dest = Arc::new(ScriptedDestination::new(
            vec![],
            vec![Err(RelayError::Rejected("wrong file type".to_string())), Ok(())],
        ));
        let uploader = RelayUploader::new(dest.clone());

        let kind = uploader
            .send_bytes("42", &file, "cap", MediaKind::Audio, "mp3")
            .await
            .unwrap();

        assert_eq!(kind, UploadKind::Document);
        let uploads = dest.uploads.lock();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].0, UploadKind::Audio);
        assert_eq!(uploads[1].0, UploadKind::Document);
        assert!(uploads[1].1.starts_with("audio_"));
        assert!(uploads[1].1.ends_with(".mp3"));
        assert_eq!(uploads[1].2, "application/octet-stream");
        drop(uploads);
        file.release().await;
    }

    #[tokio::test]
    async fn test_send_bytes_transport_failure_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let file = staged(tmp.path()).await;
        let dest = Arc::new(ScriptedDestination::new(
            vec![],
            vec![Err(RelayError::Transport("connection reset".to_string()))],
        ));
        let uploader = RelayUploader::new(dest.clone());

        let err = uploader
            .send_bytes("42", &file, "cap", MediaKind::Video, "mp4")
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Transport(_)));
        assert_eq!(dest.uploads.lock().len(), 1);
        file.release().await;
    }

    #[tokio::test]
    async fn test_send_bytes_document_rejection_surfaces() {
        let tmp = tempfile::tempdir().unwrap();
        let file = staged(tmp.path()).await;
        let dest = Arc::new(ScriptedDestination::new(
            vec![],
            vec![
                Err(RelayError::Rejected("too big".to_string())),
                Err(RelayError::Rejected("too big".to_string())),
            ],
        ));
        let uploader = RelayUploader::new(dest.clone());

        let err = uploader
            .send_bytes("42", &file, "cap", MediaKind::Video, "mp4")
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(dest.uploads.lock().len(), 2);
        file.release().await;
    }

    #[test]
    fn test_document_file_name() {
        let name = document_file_name(MediaKind::Video, ".MP4");
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".mp4"));
        let fallback = document_file_name(MediaKind::Audio, "");
        assert!(fallback.ends_with(".mp3"));
    }
}
