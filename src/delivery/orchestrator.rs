//! Delivery orchestrator.
//!
//! Runs the three-tier strategy for one selected variant:
//!
//! 1. **Reference** - the destination fetches the URL itself.
//! 2. **Fetch-relay** - download under the byte/time ceilings, then upload.
//! 3. **Link fallback** - hand the user the source URL.
//!
//! Each tier runs at most once. Tier failures, including panics, only move
//! the machine forward. A panicking progress sink loses its update and
//! nothing else; every call to [`DeliveryOrchestrator::deliver`]
//! returns exactly one [`DeliveryOutcome`].

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::progress::{DeliveryStage, ProgressSink, ProgressUpdate};
use crate::media::{format_size, BoundedFetcher, FetchLimits, MediaVariant, TransferError};
use crate::relay::{RelayError, RelayUploader, UploadKind};

/// Default hard byte ceiling (50 MiB).
pub const DEFAULT_HARD_CEILING_BYTES: u64 = 50 * 1024 * 1024;

/// Default download time budget.
pub const DEFAULT_DOWNLOAD_BUDGET_SECS: u64 = 120;

/// Ceilings applied to one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    pub hard_ceiling_bytes: u64,
    pub download_budget: Duration,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            hard_ceiling_bytes: DEFAULT_HARD_CEILING_BYTES,
            download_budget: Duration::from_secs(DEFAULT_DOWNLOAD_BUDGET_SECS),
        }
    }
}

/// Why an attempt ended in the link fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// Known size is above the ceiling; nothing was fetched.
    ExceedsCeiling { byte_size: u64, ceiling: u64 },
    Fetch(TransferError),
    Upload(RelayError),
    /// A tier panicked.
    TierPanicked { tier: &'static str },
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExceedsCeiling { byte_size, ceiling } => write!(
                f,
                "{} exceeds the {} limit",
                format_size(*byte_size),
                format_size(*ceiling)
            ),
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Upload(e) => write!(f, "{}", e),
            Self::TierPanicked { tier } => write!(f, "internal error in {} tier", tier),
        }
    }
}

/// Terminal result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    SentByReference,
    SentByUpload(UploadKind),
    /// The user gets the original source URL to open themselves.
    DeliveredAsLink { url: String, reason: FallbackReason },
    /// The attempt never started (stale session, missing variant).
    Failed(String),
}

impl DeliveryOutcome {
    /// Media reached the destination.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SentByReference | Self::SentByUpload(_))
    }

    pub fn link_url(&self) -> Option<&str> {
        match self {
            Self::DeliveredAsLink { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SentByReference => "sent_by_reference",
            Self::SentByUpload(_) => "sent_by_upload",
            Self::DeliveredAsLink { .. } => "delivered_as_link",
            Self::Failed(_) => "failed",
        }
    }
}

/// States of the delivery machine.
#[derive(Debug)]
pub enum DeliveryState {
    Idle,
    ProbingKnown,
    TierAReference,
    TierBFetchRelay,
    TierCLinkFallback(FallbackReason),
    Terminal(DeliveryOutcome),
}

impl DeliveryState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ProbingKnown => "probing_known",
            Self::TierAReference => "tier_a_reference",
            Self::TierBFetchRelay => "tier_b_fetch_relay",
            Self::TierCLinkFallback(_) => "tier_c_link_fallback",
            Self::Terminal(_) => "terminal",
        }
    }
}

/// What to deliver and where.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    /// Destination chat.
    pub target: &'a str,
    pub variant: &'a MediaVariant,
    pub caption: &'a str,
}

#[derive(Clone)]
pub struct DeliveryOrchestrator {
    fetcher: BoundedFetcher,
    uploader: RelayUploader,
    limits: DeliveryLimits,
}

impl DeliveryOrchestrator {
    pub fn new(fetcher: BoundedFetcher, uploader: RelayUploader, limits: DeliveryLimits) -> Self {
        Self {
            fetcher,
            uploader,
            limits,
        }
    }

    pub fn limits(&self) -> DeliveryLimits {
        self.limits
    }

    /// Run the tier sequence to a terminal outcome.
    pub async fn deliver(
        &self,
        request: DeliveryRequest<'_>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let mut state = DeliveryState::Idle;
        loop {
            debug!(chat = request.target, state = state.name(), "delivery state");
            state = match state {
                DeliveryState::Idle => DeliveryState::ProbingKnown,
                DeliveryState::ProbingKnown => match self.exceeds_ceiling(request.variant) {
                    Some(reason) => DeliveryState::TierCLinkFallback(reason),
                    None => DeliveryState::TierAReference,
                },
                DeliveryState::TierAReference => self.reference_tier(request, sink).await,
                DeliveryState::TierBFetchRelay => {
                    self.fetch_relay_tier(request, sink, cancel).await
                }
                DeliveryState::TierCLinkFallback(reason) => {
                    warn!(chat = request.target, reason = %reason, "falling back to link");
                    notify(sink, DeliveryStage::FallingBackToLink, request.variant).await;
                    DeliveryState::Terminal(DeliveryOutcome::DeliveredAsLink {
                        url: request.variant.source_url.clone(),
                        reason,
                    })
                }
                DeliveryState::Terminal(outcome) => {
                    info!(
                        chat = request.target,
                        outcome = outcome.label(),
                        kind = %request.variant.kind,
                        quality = %request.variant.quality_label,
                        "delivery finished"
                    );
                    return outcome;
                }
            };
        }
    }

    /// Known size above the hard ceiling. Unknown size never triggers this.
    fn exceeds_ceiling(&self, variant: &MediaVariant) -> Option<FallbackReason> {
        let ceiling = self.limits.hard_ceiling_bytes;
        (variant.size_known() && variant.byte_size > ceiling).then_some(
            FallbackReason::ExceedsCeiling {
                byte_size: variant.byte_size,
                ceiling,
            },
        )
    }

    async fn reference_tier(
        &self,
        request: DeliveryRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> DeliveryState {
        notify(sink, DeliveryStage::SendingReference, request.variant).await;

        let variant = request.variant;
        let attempt = AssertUnwindSafe(self.uploader.send_by_reference(
            request.target,
            &variant.source_url,
            request.caption,
            variant.kind,
        ))
        .catch_unwind()
        .await;

        match attempt {
            Ok(true) => {
                notify(sink, DeliveryStage::Completed, variant).await;
                DeliveryState::Terminal(DeliveryOutcome::SentByReference)
            }
            Ok(false) => DeliveryState::TierBFetchRelay,
            Err(_) => {
                error!(chat = request.target, "reference tier panicked");
                DeliveryState::TierCLinkFallback(FallbackReason::TierPanicked { tier: "reference" })
            }
        }
    }

    async fn fetch_relay_tier(
        &self,
        request: DeliveryRequest<'_>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> DeliveryState {
        // Second, authoritative ceiling check before any bytes move.
        if let Some(reason) = self.exceeds_ceiling(request.variant) {
            return DeliveryState::TierCLinkFallback(reason);
        }

        notify(sink, DeliveryStage::Downloading, request.variant).await;

        let attempt = AssertUnwindSafe(self.fetch_and_upload(request, sink, cancel))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(kind)) => {
                notify(sink, DeliveryStage::Completed, request.variant).await;
                DeliveryState::Terminal(DeliveryOutcome::SentByUpload(kind))
            }
            Ok(Err(reason)) => DeliveryState::TierCLinkFallback(reason),
            Err(_) => {
                error!(chat = request.target, "fetch-relay tier panicked");
                DeliveryState::TierCLinkFallback(FallbackReason::TierPanicked {
                    tier: "fetch_relay",
                })
            }
        }
    }

    async fn fetch_and_upload(
        &self,
        request: DeliveryRequest<'_>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UploadKind, FallbackReason> {
        let variant = request.variant;
        let limits = FetchLimits::new(self.limits.hard_ceiling_bytes, self.limits.download_budget);

        let file = self
            .fetcher
            .fetch(&variant.source_url, &variant.file_extension, limits, cancel)
            .await
            .map_err(FallbackReason::Fetch)?;

        report(
            sink,
            ProgressUpdate::new(DeliveryStage::Uploading, format_size(file.bytes_written())),
        )
        .await;

        let result = self
            .uploader
            .send_bytes(
                request.target,
                &file,
                request.caption,
                variant.kind,
                &variant.file_extension,
            )
            .await;
        file.release().await;
        result.map_err(FallbackReason::Upload)
    }
}

async fn notify(sink: &dyn ProgressSink, stage: DeliveryStage, variant: &MediaVariant) {
    report(sink, ProgressUpdate::new(stage, variant.size_label.clone())).await;
}

/// A sink that panics loses its update; the delivery carries on.
async fn report(sink: &dyn ProgressSink, update: ProgressUpdate) {
    let stage = update.stage;
    if AssertUnwindSafe(sink.on_progress(update))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(stage = %stage, "progress sink panicked");
    }
}
