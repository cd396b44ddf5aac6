//! End-to-end delivery pipeline tests: probe, tier decisions, fetch-relay,
//! link fallback and the session single-flight gate, against in-memory
//! source and destination doubles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use reelay::delivery::{
    ChannelProgress, DeliveryLimits, DeliveryOrchestrator, DeliveryOutcome, DeliveryRequest,
    DeliveryStage, FallbackReason, NoopProgress, ProgressSink, ProgressUpdate,
};
use reelay::media::{
    BoundedFetcher, MediaKind, MediaResolution, MediaSource, MediaVariant, SizeProber,
    SourceError, SourceResponse, StagingArea, TransferError,
};
use reelay::relay::{Destination, RelayError, RelayUploader, UploadKind, UploadRequest};
use reelay::resolver::{parse_resolution, ResolveError};
use reelay::sessions::{SessionStore, SessionToken};

const MB: u64 = 1024 * 1024;
const CEILING: u64 = 50 * MB;

/// Source whose HEAD answer and body are fixed up front.
struct FakeSource {
    declared: Option<u64>,
    chunk: usize,
    chunks: usize,
    chunk_delay: Duration,
    heads: AtomicU32,
    opens: AtomicU32,
}

impl FakeSource {
    fn new(declared: Option<u64>) -> Self {
        Self {
            declared,
            chunk: 64 * 1024,
            chunks: 4,
            chunk_delay: Duration::ZERO,
            heads: AtomicU32::new(0),
            opens: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn content_length(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<Option<u64>, SourceError> {
        self.heads.fetch_add(1, Ordering::Relaxed);
        Ok(self.declared)
    }

    async fn open(&self, _url: &str) -> Result<SourceResponse, SourceError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let chunk = self.chunk;
        let delay = self.chunk_delay;
        let body = futures_util::stream::unfold(self.chunks, move |remaining| async move {
            if remaining == 0 {
                return None;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((Ok(Bytes::from(vec![1u8; chunk])), remaining - 1))
        })
        .boxed();
        Ok(SourceResponse {
            content_length: self.declared,
            body,
        })
    }
}

struct FakeDestination {
    accept_reference: bool,
    reference_delay: Duration,
    upload_result: Result<(), RelayError>,
    reference_calls: AtomicU32,
    upload_calls: AtomicU32,
}

impl FakeDestination {
    fn new(accept_reference: bool) -> Self {
        Self {
            accept_reference,
            reference_delay: Duration::ZERO,
            upload_result: Ok(()),
            reference_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Destination for FakeDestination {
    async fn send_by_reference(
        &self,
        _target: &str,
        _url: &str,
        _caption: &str,
        _kind: MediaKind,
        _timeout: Duration,
    ) -> Result<(), RelayError> {
        self.reference_calls.fetch_add(1, Ordering::Relaxed);
        if !self.reference_delay.is_zero() {
            tokio::time::sleep(self.reference_delay).await;
        }
        if self.accept_reference {
            Ok(())
        } else {
            Err(RelayError::Rejected(
                "Bad Request: failed to get HTTP URL content".to_string(),
            ))
        }
    }

    async fn upload_file(
        &self,
        _target: &str,
        _upload: &UploadRequest<'_>,
        _timeout: Duration,
    ) -> Result<(), RelayError> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        self.upload_result.clone()
    }
}

/// Panics on one stage, counts every other update it sees.
struct PanickingSink {
    on: DeliveryStage,
    seen: AtomicU32,
}

#[async_trait]
impl ProgressSink for PanickingSink {
    async fn on_progress(&self, update: ProgressUpdate) {
        if update.stage == self.on {
            panic!("sink failed on {}", update.stage);
        }
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

struct Pipeline {
    source: Arc<FakeSource>,
    destination: Arc<FakeDestination>,
    prober: SizeProber,
    orchestrator: DeliveryOrchestrator,
    staging: StagingArea,
    _tmp: tempfile::TempDir,
}

fn pipeline(source: FakeSource, destination: FakeDestination, budget: Duration) -> Pipeline {
    let tmp = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(tmp.path().join("staging"));
    let source = Arc::new(source);
    let destination = Arc::new(destination);
    let prober = SizeProber::new(source.clone());
    let orchestrator = DeliveryOrchestrator::new(
        BoundedFetcher::new(source.clone(), staging.clone()),
        RelayUploader::new(destination.clone()),
        DeliveryLimits {
            hard_ceiling_bytes: CEILING,
            download_budget: budget,
        },
    );
    Pipeline {
        source,
        destination,
        prober,
        orchestrator,
        staging,
        _tmp: tmp,
    }
}

async fn probed_resolution(p: &Pipeline) -> MediaResolution {
    let mut resolution = MediaResolution::new("Reel", "Someone").with_variants(vec![MediaVariant::new(
        MediaKind::Video,
        "HD",
        "mp4",
        "https://cdn.example/hd.mp4",
    )]);
    p.prober.annotate(&mut resolution).await;
    resolution
}

async fn deliver(p: &Pipeline, variant: &MediaVariant) -> (DeliveryOutcome, Vec<DeliveryStage>) {
    p.staging.prepare().await.unwrap();
    let (sink, mut rx) = ChannelProgress::new();
    let outcome = p
        .orchestrator
        .deliver(
            DeliveryRequest {
                target: "1001",
                variant,
                caption: "Reel",
            },
            &sink,
            &CancellationToken::new(),
        )
        .await;
    drop(sink);
    let mut stages = Vec::new();
    while let Some(update) = rx.recv().await {
        stages.push(update.stage);
    }
    (outcome, stages)
}

#[tokio::test]
async fn test_scenario_known_small_size_sent_by_reference() {
    let p = pipeline(
        FakeSource::new(Some(10 * MB)),
        FakeDestination::new(true),
        Duration::from_secs(5),
    );
    let resolution = probed_resolution(&p).await;
    assert_eq!(resolution.variants[0].byte_size, 10 * MB);

    let (outcome, _) = deliver(&p, &resolution.variants[0]).await;

    assert_eq!(outcome, DeliveryOutcome::SentByReference);
    assert_eq!(p.source.opens.load(Ordering::Relaxed), 0);
    assert_eq!(p.destination.upload_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_scenario_oversized_goes_straight_to_link() {
    let p = pipeline(
        FakeSource::new(Some(80 * MB)),
        FakeDestination::new(true),
        Duration::from_secs(5),
    );
    let resolution = probed_resolution(&p).await;
    let (outcome, stages) = deliver(&p, &resolution.variants[0]).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::DeliveredAsLink {
            url: "https://cdn.example/hd.mp4".to_string(),
            reason: FallbackReason::ExceedsCeiling {
                byte_size: 80 * MB,
                ceiling: CEILING,
            },
        }
    );
    assert_eq!(stages, vec![DeliveryStage::FallingBackToLink]);
    assert_eq!(p.source.opens.load(Ordering::Relaxed), 0);
    assert_eq!(p.destination.reference_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_scenario_unknown_size_slow_stream_times_out() {
    let mut source = FakeSource::new(None);
    source.chunks = 20;
    source.chunk_delay = Duration::from_millis(100);
    let p = pipeline(source, FakeDestination::new(false), Duration::from_millis(350));

    let resolution = probed_resolution(&p).await;
    assert!(!resolution.variants[0].size_known());

    let (outcome, stages) = deliver(&p, &resolution.variants[0]).await;

    match outcome {
        DeliveryOutcome::DeliveredAsLink { url, reason } => {
            assert_eq!(url, "https://cdn.example/hd.mp4");
            assert!(matches!(reason, FallbackReason::Fetch(TransferError::Timeout { .. })));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        stages,
        vec![
            DeliveryStage::SendingReference,
            DeliveryStage::Downloading,
            DeliveryStage::FallingBackToLink,
        ]
    );
    assert_eq!(p.destination.reference_calls.load(Ordering::Relaxed), 1);
    assert_eq!(p.destination.upload_calls.load(Ordering::Relaxed), 0);
    assert_eq!(p.staging.count().await, 0);
}

#[test]
fn test_scenario_empty_medias_is_no_media() {
    let err = parse_resolution(&json!({"error": false, "title": "x", "medias": []})).unwrap_err();
    assert!(matches!(err, ResolveError::NoMedia));
}

#[tokio::test]
async fn test_scenario_second_request_while_in_flight_is_refused() {
    let mut destination = FakeDestination::new(true);
    destination.reference_delay = Duration::from_millis(200);
    let p = Arc::new(pipeline(
        FakeSource::new(Some(MB)),
        destination,
        Duration::from_secs(5),
    ));
    let resolution = probed_resolution(&p).await;
    let variant = resolution.variants[0].clone();

    let sessions = SessionStore::new();
    let token = SessionToken::from(1001);
    sessions.store(&token, resolution);

    let claim = sessions.try_begin_delivery(&token).unwrap();
    let running = {
        let p = Arc::clone(&p);
        tokio::spawn(async move {
            p.orchestrator
                .deliver(
                    DeliveryRequest {
                        target: "1001",
                        variant: &variant,
                        caption: "Reel",
                    },
                    &NoopProgress,
                    &CancellationToken::new(),
                )
                .await
        })
    };

    assert!(sessions.try_begin_delivery(&token).is_none());

    let outcome = running.await.unwrap();
    claim.end_delivery(&outcome);

    assert_eq!(p.destination.reference_calls.load(Ordering::Relaxed), 1);
    let session = sessions.resolve(&token).unwrap();
    assert_eq!(session.delivered_count, 1);
    assert!(!session.in_flight);
}

#[tokio::test]
async fn test_panicking_sink_still_releases_the_session() {
    let p = pipeline(
        FakeSource::new(None),
        FakeDestination::new(false),
        Duration::from_secs(5),
    );
    let resolution = probed_resolution(&p).await;
    let variant = resolution.variants[0].clone();
    p.staging.prepare().await.unwrap();

    let sessions = SessionStore::new();
    let token = SessionToken::from(1001);
    sessions.store(&token, resolution);

    let sink = PanickingSink {
        on: DeliveryStage::Downloading,
        seen: AtomicU32::new(0),
    };
    let claim = sessions.try_begin_delivery(&token).unwrap();
    let outcome = p
        .orchestrator
        .deliver(
            DeliveryRequest {
                target: "1001",
                variant: &variant,
                caption: "Reel",
            },
            &sink,
            &CancellationToken::new(),
        )
        .await;
    claim.end_delivery(&outcome);

    assert_eq!(outcome, DeliveryOutcome::SentByUpload(UploadKind::Video));
    assert!(sink.seen.load(Ordering::Relaxed) > 0);
    assert!(!sessions.resolve(&token).unwrap().in_flight);
    assert!(sessions.try_begin_delivery(&token).is_some());
    assert_eq!(p.staging.count().await, 0);
}

#[tokio::test]
async fn test_task_panicking_mid_delivery_releases_the_session() {
    let sessions = SessionStore::new();
    let token = SessionToken::from(1001);
    sessions.store(&token, MediaResolution::new("Reel", "Someone"));

    let task = {
        let sessions = sessions.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let _claim = sessions.try_begin_delivery(&token).unwrap();
            panic!("handler failed mid-delivery");
        })
    };
    assert!(task.await.unwrap_err().is_panic());

    let session = sessions.resolve(&token).unwrap();
    assert!(!session.in_flight);
    assert_eq!(session.delivered_count, 0);
    assert!(sessions.try_begin_delivery(&token).is_some());
}

#[tokio::test]
async fn test_fetch_relay_success_leaves_no_staging_file() {
    let p = pipeline(
        FakeSource::new(None),
        FakeDestination::new(false),
        Duration::from_secs(5),
    );
    let resolution = probed_resolution(&p).await;
    let (outcome, stages) = deliver(&p, &resolution.variants[0]).await;

    assert_eq!(outcome, DeliveryOutcome::SentByUpload(UploadKind::Video));
    assert_eq!(stages.last(), Some(&DeliveryStage::Completed));
    assert_eq!(p.source.opens.load(Ordering::Relaxed), 1);
    assert_eq!(p.staging.count().await, 0);
}

#[tokio::test]
async fn test_upload_failure_leaves_no_staging_file() {
    let mut destination = FakeDestination::new(false);
    destination.upload_result = Err(RelayError::Transport("reset".to_string()));
    let p = pipeline(FakeSource::new(None), destination, Duration::from_secs(5));
    let resolution = probed_resolution(&p).await;
    let (outcome, _) = deliver(&p, &resolution.variants[0]).await;

    assert!(matches!(
        outcome,
        DeliveryOutcome::DeliveredAsLink {
            reason: FallbackReason::Upload(_),
            ..
        }
    ));
    assert_eq!(p.staging.count().await, 0);
}

#[tokio::test]
async fn test_cancellation_falls_back_to_link() {
    let mut source = FakeSource::new(None);
    source.chunks = 50;
    source.chunk_delay = Duration::from_millis(50);
    let p = pipeline(source, FakeDestination::new(false), Duration::from_secs(30));
    let resolution = probed_resolution(&p).await;
    p.staging.prepare().await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let outcome = p
        .orchestrator
        .deliver(
            DeliveryRequest {
                target: "1001",
                variant: &resolution.variants[0],
                caption: "Reel",
            },
            &NoopProgress,
            &cancel,
        )
        .await;

    assert!(matches!(
        outcome,
        DeliveryOutcome::DeliveredAsLink {
            reason: FallbackReason::Fetch(TransferError::Cancelled),
            ..
        }
    ));
    assert_eq!(p.staging.count().await, 0);
}

#[tokio::test]
async fn test_probe_is_idempotent() {
    let p = pipeline(
        FakeSource::new(Some(12 * MB)),
        FakeDestination::new(true),
        Duration::from_secs(5),
    );
    let first = p.prober.probe("https://cdn.example/hd.mp4").await;
    let second = p.prober.probe("https://cdn.example/hd.mp4").await;
    assert_eq!(first, second);
    assert_eq!(p.source.heads.load(Ordering::Relaxed), 2);
}
