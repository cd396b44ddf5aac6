//! Delivery module
//!
//! Drives one selected variant to the destination through the reference,
//! fetch-relay and link-fallback tiers, reporting progress as it goes.

pub mod orchestrator;
pub mod progress;

pub use orchestrator::{
    DeliveryLimits, DeliveryOrchestrator, DeliveryOutcome, DeliveryRequest, DeliveryState,
    FallbackReason, DEFAULT_DOWNLOAD_BUDGET_SECS, DEFAULT_HARD_CEILING_BYTES,
};
pub use progress::{ChannelProgress, DeliveryStage, NoopProgress, ProgressSink, ProgressUpdate};
