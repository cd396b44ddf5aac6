//! Progress sink that edits the message the user pressed a button on.

use async_trait::async_trait;
use tracing::debug;

use super::replies;
use crate::channels::telegram::{InlineKeyboardMarkup, TelegramChannel};
use crate::delivery::{DeliveryOutcome, ProgressSink, ProgressUpdate};
use crate::media::MediaKind;

/// Edit a status message in place: its caption for photos, its text otherwise.
///
/// Failures are logged and swallowed; "message is not modified" is ignored.
pub async fn edit_status_message(
    channel: &TelegramChannel,
    chat_id: i64,
    message_id: i64,
    is_photo: bool,
    text: &str,
    markup: Option<&InlineKeyboardMarkup>,
) {
    let result = if is_photo {
        channel
            .edit_message_caption(chat_id, message_id, text, markup)
            .await
    } else {
        channel
            .edit_message_text(chat_id, message_id, text, markup)
            .await
    };
    match result {
        Ok(()) => {}
        Err(e) if e.is_not_modified() => {}
        Err(e) => debug!(chat_id, error = %e, "status message edit failed"),
    }
}

/// Status surface for one delivery.
#[derive(Debug, Clone)]
pub struct StatusMessageSink {
    channel: TelegramChannel,
    chat_id: i64,
    message_id: i64,
    is_photo: bool,
    kind: MediaKind,
    quality: String,
}

impl StatusMessageSink {
    pub fn new(
        channel: TelegramChannel,
        chat_id: i64,
        message_id: i64,
        is_photo: bool,
        kind: MediaKind,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            chat_id,
            message_id,
            is_photo,
            kind,
            quality: quality.into(),
        }
    }

    pub async fn show(&self, text: &str, markup: Option<&InlineKeyboardMarkup>) {
        edit_status_message(
            &self.channel,
            self.chat_id,
            self.message_id,
            self.is_photo,
            text,
            markup,
        )
        .await;
    }

    /// The one closing edit, made once the orchestrator has returned.
    pub async fn finish(&self, outcome: &DeliveryOutcome) {
        let (text, markup) = replies::outcome_status(outcome, self.kind, &self.quality);
        self.show(&text, markup.as_ref()).await;
    }
}

#[async_trait]
impl ProgressSink for StatusMessageSink {
    async fn on_progress(&self, update: ProgressUpdate) {
        // `Completed` has no status of its own; `finish` writes the result.
        if let Some(text) = replies::stage_status(update.stage, &self.quality, &update.size_label) {
            self.show(&text, None).await;
        }
    }
}
