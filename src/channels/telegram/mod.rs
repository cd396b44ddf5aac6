//! Telegram Channel
//!
//! Thin Bot API client over reqwest. It serves two roles: the conversational
//! surface the bot talks through (messages, keyboards, callback answers,
//! long polling) and the [`Destination`] media is relayed to.

mod error;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::debug;

pub use error::TelegramApiError;
pub use types::{CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, Update, User};

use crate::media::MediaKind;
use crate::relay::{Destination, RelayError, UploadKind, UploadRequest};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll wait passed to `getUpdates`.
pub const POLL_TIMEOUT_SECS: u64 = 30;

/// Timeout for plain (non-media) calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bot API caption limit, in characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, api_base: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = match reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "failed to build Telegram HTTP client with timeouts; falling back to default client"
                );
                reqwest::Client::new()
            }
        };
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramApiError> {
        debug!(method, "Telegram API call");
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(TelegramApiError::from_reqwest)?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TelegramApiError> {
        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(TelegramApiError::from_reqwest)?;
        let parsed = serde_json::from_str::<Value>(&body_text).ok();

        if !status.is_success() {
            return Err(TelegramApiError::from_response(status, parsed.as_ref(), &body_text));
        }

        let Some(data) = parsed else {
            return Err(TelegramApiError::local(format!(
                "failed to parse Telegram success response: {body_text}"
            )));
        };

        let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !ok {
            return Err(TelegramApiError::from_response(status, Some(&data), &body_text));
        }

        let result = data.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| TelegramApiError::local(format!("unexpected Telegram result shape: {e}")))
    }

    fn plain_timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }

    pub async fn get_me(&self) -> Result<User, TelegramApiError> {
        self.call("getMe", &json!({}), Self::plain_timeout()).await
    }

    /// Polling and webhooks are exclusive; clear any webhook before polling.
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<bool, TelegramApiError> {
        self.call(
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending_updates }),
            Self::plain_timeout(),
        )
        .await
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramApiError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        // The HTTP timeout has to outlast the long-poll wait.
        self.call("getUpdates", &body, Duration::from_secs(timeout_secs + 10))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = markup {
            body["reply_markup"] = json!(markup);
        }
        self.call("sendMessage", &body, Self::plain_timeout()).await
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "photo": photo_url,
            "caption": truncate_caption(caption),
        });
        if let Some(markup) = markup {
            body["reply_markup"] = json!(markup);
        }
        self.call("sendPhoto", &body, Self::plain_timeout()).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = markup {
            body["reply_markup"] = json!(markup);
        }
        // Result is the edited Message or `true`; neither is needed.
        self.call::<Value>("editMessageText", &body, Self::plain_timeout())
            .await
            .map(|_| ())
    }

    pub async fn edit_message_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "caption": truncate_caption(caption),
        });
        if let Some(markup) = markup {
            body["reply_markup"] = json!(markup);
        }
        self.call::<Value>("editMessageCaption", &body, Self::plain_timeout())
            .await
            .map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramApiError> {
        self.call::<Value>(
            "deleteMessage",
            &json!({ "chat_id": chat_id, "message_id": message_id }),
            Self::plain_timeout(),
        )
        .await
        .map(|_| ())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramApiError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<Value>("answerCallbackQuery", &body, Self::plain_timeout())
            .await
            .map(|_| ())
    }
}

/// `(method, field)` for a by-reference send.
fn reference_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Audio => ("sendAudio", "audio"),
    }
}

/// `(method, field)` for a byte upload.
fn upload_method(kind: UploadKind) -> (&'static str, &'static str) {
    match kind {
        UploadKind::Video => ("sendVideo", "video"),
        UploadKind::Audio => ("sendAudio", "audio"),
        UploadKind::Document => ("sendDocument", "document"),
    }
}

pub fn truncate_caption(caption: &str) -> String {
    if caption.chars().count() <= MAX_CAPTION_CHARS {
        return caption.to_string();
    }
    let mut truncated: String = caption.chars().take(MAX_CAPTION_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

#[async_trait]
impl Destination for TelegramChannel {
    async fn send_by_reference(
        &self,
        target: &str,
        url: &str,
        caption: &str,
        kind: MediaKind,
        timeout: Duration,
    ) -> Result<(), RelayError> {
        let (method, field) = reference_method(kind);
        let mut body = json!({
            "chat_id": target,
            "caption": truncate_caption(caption),
        });
        body[field] = json!(url);
        if kind == MediaKind::Video {
            body["supports_streaming"] = json!(true);
        }
        self.call::<Value>(method, &body, timeout)
            .await
            .map(|_| ())
            .map_err(RelayError::from)
    }

    async fn upload_file(
        &self,
        target: &str,
        upload: &UploadRequest<'_>,
        timeout: Duration,
    ) -> Result<(), RelayError> {
        let (method, field) = upload_method(upload.kind);
        let file = tokio::fs::File::open(upload.path)
            .await
            .map_err(|e| RelayError::Io(format!("{}: {e}", upload.path.display())))?;

        let part = Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            upload.length,
        )
        .file_name(upload.file_name.clone())
        .mime_str(&upload.mime_type)
        .map_err(|e| RelayError::Io(format!("invalid mime type {}: {e}", upload.mime_type)))?;

        let mut form = Form::new()
            .text("chat_id", target.to_string())
            .text("caption", truncate_caption(upload.caption))
            .part(field, part);
        if upload.kind == UploadKind::Video {
            form = form.text("supports_streaming", "true");
        }

        debug!(method, bytes = upload.length, "Telegram multipart upload");
        let response = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RelayError::from(TelegramApiError::from_reqwest(e)))?;

        Self::parse_response::<Value>(response)
            .await
            .map(|_| ())
            .map_err(RelayError::from)
    }
}
