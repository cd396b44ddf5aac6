//! Media pipeline module
//!
//! Everything between "we have a media URL" and "the bytes are on local disk":
//!
//! - **types**: the resolved media model ([`MediaResolution`], [`MediaVariant`])
//! - **MediaSource**: HEAD + streaming GET abstraction, reqwest-backed in production
//! - **SizeProber**: best-effort content length discovery, never fails
//! - **StagingArea**: temporary files with guaranteed deletion
//! - **BoundedFetcher**: streaming download under live byte and time ceilings
//!
//! # Example
//!
//! ```ignore
//! use reelay::media::{BoundedFetcher, FetchLimits, HttpSource, StagingArea};
//!
//! let fetcher = BoundedFetcher::new(Arc::new(HttpSource::new()), StagingArea::new("/tmp/reelay"));
//! let limits = FetchLimits::new(50 * 1024 * 1024, Duration::from_secs(120));
//! let file = fetcher.fetch(url, "mp4", limits, &CancellationToken::new()).await?;
//! println!("staged {} bytes at {:?}", file.bytes_written(), file.path());
//! file.release().await;
//! ```

pub mod fetch;
pub mod probe;
pub mod source;
pub mod staging;
pub mod types;

pub use fetch::{BoundedFetcher, FetchLimits, TransferError};
pub use probe::{SizeProber, DEFAULT_PROBE_TIMEOUT_SECS};
pub use source::{ByteStream, HttpSource, MediaSource, SourceError, SourceResponse};
pub use staging::{StagingArea, StagingError, StagingFile, COMMIT_CHUNK_SIZE, STAGING_PREFIX};
pub use types::{format_duration, format_size, MediaKind, MediaResolution, MediaVariant};
