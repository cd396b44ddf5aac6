//! HTTP source, size probe and bounded fetch against a local axum server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use reelay::media::{
    BoundedFetcher, FetchLimits, HttpSource, MediaSource, SizeProber, SourceError, StagingArea,
    TransferError,
};

const SMALL_LEN: usize = 4096;
const BIG_LEN: usize = 64 * 1024;

async fn small_body() -> Vec<u8> {
    vec![7u8; SMALL_LEN]
}

async fn small_head() -> impl axum::response::IntoResponse {
    ([(header::CONTENT_LENGTH, SMALL_LEN.to_string())], StatusCode::OK)
}

async fn big_body() -> Vec<u8> {
    vec![9u8; BIG_LEN]
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/small.mp4", get(small_body).head(small_head))
        .route("/big.mp4", get(big_body))
        .route("/missing.mp4", get(missing))
        .route("/post-only", post(small_body));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fetcher(dir: &std::path::Path) -> (BoundedFetcher, StagingArea) {
    let staging = StagingArea::new(dir.join("staging"));
    let source: Arc<dyn MediaSource> = Arc::new(HttpSource::new());
    (BoundedFetcher::new(source, staging.clone()), staging)
}

#[tokio::test]
async fn test_fetch_small_body_into_staging() {
    let addr = spawn_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let (fetcher, staging) = fetcher(tmp.path());
    staging.prepare().await.unwrap();

    let file = fetcher
        .fetch(
            &format!("http://{}/small.mp4", addr),
            "mp4",
            FetchLimits::new(1024 * 1024, Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(file.bytes_written(), SMALL_LEN as u64);
    let on_disk = tokio::fs::read(file.path()).await.unwrap();
    assert_eq!(on_disk.len(), SMALL_LEN);
    assert!(on_disk.iter().all(|b| *b == 7));

    file.release().await;
    assert_eq!(staging.count().await, 0);
}

#[tokio::test]
async fn test_fetch_declared_length_over_ceiling() {
    let addr = spawn_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let (fetcher, staging) = fetcher(tmp.path());
    staging.prepare().await.unwrap();

    let err = fetcher
        .fetch(
            &format!("http://{}/big.mp4", addr),
            "mp4",
            FetchLimits::new(1024, Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, TransferError::TooLarge { limit: 1024 });
    assert_eq!(staging.count().await, 0);
}

#[tokio::test]
async fn test_fetch_not_found_is_network_failure() {
    let addr = spawn_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let (fetcher, staging) = fetcher(tmp.path());
    staging.prepare().await.unwrap();

    let err = fetcher
        .fetch(
            &format!("http://{}/missing.mp4", addr),
            "mp4",
            FetchLimits::new(1024 * 1024, Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::NetworkFailure(ref msg) if msg.contains("404")));
    assert_eq!(staging.count().await, 0);
}

#[tokio::test]
async fn test_head_reports_content_length() {
    let addr = spawn_server().await;
    let source = HttpSource::new();
    let length = source
        .content_length(&format!("http://{}/small.mp4", addr), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(length, Some(SMALL_LEN as u64));
}

#[tokio::test]
async fn test_head_error_status() {
    let addr = spawn_server().await;
    let source = HttpSource::new();
    let err = source
        .content_length(&format!("http://{}/post-only", addr), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err, SourceError::Status(405));
}

#[tokio::test]
async fn test_probe_known_and_unknown() {
    let addr = spawn_server().await;
    let prober = SizeProber::with_timeout(Arc::new(HttpSource::new()), Duration::from_secs(5));

    assert_eq!(
        prober.probe(&format!("http://{}/small.mp4", addr)).await,
        SMALL_LEN as u64
    );
    assert_eq!(prober.probe(&format!("http://{}/post-only", addr)).await, 0);
    assert_eq!(prober.probe(&format!("http://{}/missing.mp4", addr)).await, 0);
}
