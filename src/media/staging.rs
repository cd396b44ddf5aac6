//! Temporary staging storage.
//!
//! A [`StagingFile`] lives for exactly one delivery attempt. It is deleted by
//! [`StagingFile::release`] on the normal path and by `Drop` on every other
//! path (early return, cancellation, panic unwinding). Files left behind by a
//! crashed process are swept by [`StagingArea::prepare`] at startup.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Filename prefix of every staging file; the startup sweep only touches these.
pub const STAGING_PREFIX: &str = "reelay-";

/// Write buffer size. Bytes reach disk in commits of this size.
pub const COMMIT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create staging file: {0}")]
    CreateFile(std::io::Error),

    #[error("staging write failed: {0}")]
    Write(std::io::Error),

    #[error("staging file already finished")]
    Finished,
}

/// Directory that hands out staging files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and delete leftovers from an earlier run.
    ///
    /// Returns the number of stale files removed.
    pub async fn prepare(&self) -> Result<usize, StagingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list staging directory");
                return Ok(0);
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove stale staging file"),
            }
        }
        if removed > 0 {
            debug!(removed, "swept stale staging files");
        }
        Ok(removed)
    }

    /// Create a fresh, empty staging file.
    pub async fn acquire(&self, extension: &str) -> Result<StagingFile, StagingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let ext = sanitize_extension(extension);
        let file_name = format!("{}{}.{}", STAGING_PREFIX, uuid::Uuid::new_v4().simple(), ext);
        let path = self.dir.join(&file_name);

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(StagingError::CreateFile)?;

        debug!(path = %path.display(), "acquired staging file");
        Ok(StagingFile {
            path,
            file_name,
            bytes_written: 0,
            writer: Some(BufWriter::with_capacity(COMMIT_CHUNK_SIZE, file)),
            released: false,
        })
    }

    /// Number of staging files currently on disk.
    pub async fn count(&self) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                count += 1;
            }
        }
        count
    }
}

/// A staged media file owned by one delivery attempt.
pub struct StagingFile {
    path: PathBuf,
    file_name: String,
    bytes_written: u64,
    writer: Option<BufWriter<File>>,
    released: bool,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one chunk.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StagingError> {
        let writer = self.writer.as_mut().ok_or(StagingError::Finished)?;
        writer.write_all(chunk).await.map_err(StagingError::Write)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and close the write handle. The file stays on disk until released.
    pub async fn finish(&mut self) -> Result<(), StagingError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await.map_err(StagingError::Write)?;
            writer.into_inner().sync_all().await.map_err(StagingError::Write)?;
        }
        Ok(())
    }

    /// Delete the file from disk.
    pub async fn release(mut self) {
        drop(self.writer.take());
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "released staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete staging file"),
        }
        self.released = true;
    }
}

impl std::fmt::Debug for StagingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingFile")
            .field("path", &self.path)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        drop(self.writer.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging file removed on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete staging file on drop"),
        }
    }
}

/// Keep extensions to a short alphanumeric token so they are safe in a filename.
fn sanitize_extension(extension: &str) -> String {
    let cleaned: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}
