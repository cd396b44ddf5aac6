//! Size prober.
//!
//! Best-effort byte length discovery. A probe never fails: anything that
//! goes wrong is reported as `0` (unknown), which downstream code treats
//! optimistically.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::debug;

use super::source::MediaSource;
use super::types::MediaResolution;

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct SizeProber {
    source: Arc<dyn MediaSource>,
    timeout: Duration,
}

impl SizeProber {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self::with_timeout(source, Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS))
    }

    pub fn with_timeout(source: Arc<dyn MediaSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Byte length of `url`, or 0 when it cannot be learned within the timeout.
    pub async fn probe(&self, url: &str) -> u64 {
        // The outer timeout also bounds sources that ignore the hint.
        let result = tokio::time::timeout(self.timeout, self.source.content_length(url, self.timeout))
            .await;
        match result {
            Ok(Ok(Some(length))) => length,
            Ok(Ok(None)) => {
                debug!("probe returned no content length");
                0
            }
            Ok(Err(e)) => {
                debug!(error = %e, "size probe failed");
                0
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "size probe timed out");
                0
            }
        }
    }

    /// Probe every variant whose size is still unknown, concurrently.
    ///
    /// Returns how many variants learned a size.
    pub async fn annotate(&self, resolution: &mut MediaResolution) -> usize {
        let pending: Vec<(usize, String)> = resolution
            .variants
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.size_known())
            .map(|(i, v)| (i, v.source_url.clone()))
            .collect();

        let sizes = join_all(pending.iter().map(|(_, url)| self.probe(url))).await;

        let mut refined = 0;
        for ((index, _), size) in pending.into_iter().zip(sizes) {
            if let Some(variant) = resolution.variants.get_mut(index) {
                if variant.refine_size(size) {
                    refined += 1;
                }
            }
        }
        refined
    }
}
