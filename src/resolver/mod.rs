//! Metadata resolver
//!
//! Turns a source link into a [`MediaResolution`] by calling the Zyla
//! downloader API. The response is loosely shaped JSON, so parsing is done
//! over `serde_json::Value` and every field has a fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::logging::redact::redact_secrets;
use crate::media::{MediaKind, MediaResolution, MediaVariant};

/// Default resolver endpoint.
pub const DEFAULT_ZYLA_API_URL: &str =
    "https://zylalabs.com/api/4146/facebook+download+api/7134/downloader";

/// Request timeout for one lookup.
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 30;

const DEFAULT_TITLE: &str = "Facebook Video";
const DEFAULT_AUTHOR: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resolver API key is not configured")]
    NotConfigured,

    #[error("resolver request failed: {0}")]
    Request(String),

    #[error("resolver returned HTTP {0}")]
    Status(u16),

    #[error("invalid resolver response: {0}")]
    InvalidResponse(String),

    /// The lookup worked but there is nothing to download.
    #[error("no downloadable media found")]
    NoMedia,
}

/// Source-link to media-variants lookup.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<MediaResolution, ResolveError>;
}

/// Zyla Labs Facebook downloader client.
#[derive(Debug, Clone)]
pub struct ZylaResolver {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ZylaResolver {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                warn!(
                    error = %error,
                    "failed to build resolver HTTP client with timeouts; falling back to default client"
                );
                reqwest::Client::new()
            }
        };
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl MetadataResolver for ZylaResolver {
    async fn resolve(&self, link: &str) -> Result<MediaResolution, ResolveError> {
        if self.api_key.trim().is_empty() {
            return Err(ResolveError::NotConfigured);
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "url": link }))
            .send()
            .await
            .map_err(|e| ResolveError::Request(redact_secrets(&e.without_url().to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidResponse(e.without_url().to_string()))?;

        let resolution = parse_resolution(&body)?;
        debug!(
            resolution = %resolution.id,
            variants = resolution.variants.len(),
            "resolved source link"
        );
        Ok(resolution)
    }
}

/// Build a resolution from a resolver response body.
///
/// Videos come first, then audios, each in response order. Entries with an
/// unknown `type` or without a `url` are skipped.
pub fn parse_resolution(body: &Value) -> Result<MediaResolution, ResolveError> {
    let object = body
        .as_object()
        .ok_or_else(|| ResolveError::InvalidResponse("expected a JSON object".to_string()))?;

    // The service sets `error: false` on success; an absent flag is a failure.
    if object.get("error").map_or(true, is_truthy) {
        return Err(ResolveError::NoMedia);
    }

    let medias = object
        .get("medias")
        .and_then(Value::as_array)
        .ok_or(ResolveError::NoMedia)?;

    let parsed: Vec<MediaVariant> = medias.iter().filter_map(parse_variant).collect();
    let (mut variants, audios): (Vec<_>, Vec<_>) = parsed
        .into_iter()
        .partition(|variant| variant.kind == MediaKind::Video);
    variants.extend(audios);

    if variants.is_empty() {
        return Err(ResolveError::NoMedia);
    }

    let mut resolution = MediaResolution::new(
        string_field(body, "title").unwrap_or(DEFAULT_TITLE),
        string_field(body, "author").unwrap_or(DEFAULT_AUTHOR),
    )
    .with_variants(variants);
    resolution.duration_millis = body.get("duration").map(millis).unwrap_or(0);
    resolution.thumbnail_url = string_field(body, "thumbnail").map(str::to_string);
    Ok(resolution)
}

fn parse_variant(entry: &Value) -> Option<MediaVariant> {
    let kind = MediaKind::from_type_field(entry.get("type")?.as_str()?)?;
    let url = string_field(entry, "url")?;
    let quality = string_field(entry, "quality").unwrap_or(kind.default_quality());
    let extension = string_field(entry, "extension").unwrap_or(kind.default_extension());

    let variant = MediaVariant::new(kind, quality, extension.trim_start_matches('.'), url);
    // Some responses carry a size already; use it when it is a plain number.
    match entry.get("size").and_then(Value::as_u64) {
        Some(size) => Some(variant.with_size(size)),
        None => Some(variant),
    }
}

/// Non-empty string field.
fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn millis(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
