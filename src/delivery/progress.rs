//! Progress sink.
//!
//! The orchestrator reports each tier transition through a [`ProgressSink`].
//! Updates come from one sequential state machine, so a sink sees them in
//! tier order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where a delivery attempt currently is, from the observer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    /// Asking the destination to fetch the URL itself.
    SendingReference,
    /// Entered fetch-relay; bytes are being downloaded.
    Downloading,
    /// Download finished; bytes are being uploaded.
    Uploading,
    /// Giving up on relaying; the user will get a link.
    FallingBackToLink,
    /// Media reached the destination.
    Completed,
}

impl std::fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendingReference => write!(f, "sending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Uploading => write!(f, "uploading"),
            Self::FallingBackToLink => write!(f, "link_fallback"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub stage: DeliveryStage,
    /// Best-known size, e.g. "12.4 MB" or "unknown size".
    pub size_label: String,
}

impl ProgressUpdate {
    pub fn new(stage: DeliveryStage, size_label: impl Into<String>) -> Self {
        Self {
            stage,
            size_label: size_label.into(),
        }
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, update: ProgressUpdate);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Forwards updates into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgress {
    async fn on_progress(&self, update: ProgressUpdate) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.tx.send(update);
    }
}
