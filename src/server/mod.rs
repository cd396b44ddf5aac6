//! Health server
//!
//! Liveness endpoints for hosting platforms that expect an open HTTP port:
//! `GET /` returns a banner and `GET /health` returns `OK`.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::sync::watch;

pub const BANNER: &str = "✅ Facebook Video Downloader Bot is Running!";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

async fn index_handler() -> &'static str {
    BANNER
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
}

pub fn parse_bind_address(bind: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let address = format!("{}:{}", bind, port);
    address
        .parse::<SocketAddr>()
        .map_err(|e| ServerError::InvalidAddress {
            address,
            message: e.to_string(),
        })
}

/// Serve until `shutdown` flips to true.
pub async fn serve(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr,
            source,
        })?;
    tracing::info!(address = %addr, "health server listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("health server stopped");
    Ok(())
}
