//! Conversational layer.
//!
//! Long-polls the Bot API and turns updates into work: commands get a canned
//! reply, source links get resolved into a quality keyboard, and button
//! presses start a delivery. Each update is handled on its own task so a
//! slow delivery never holds up polling.

pub mod callback;
pub mod progress;
pub mod replies;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channels::telegram::{
    CallbackQuery, Message, TelegramApiError, TelegramChannel, Update, POLL_TIMEOUT_SECS,
};
use crate::delivery::{DeliveryOrchestrator, DeliveryRequest};
use crate::links::SourceLinkValidator;
use crate::media::SizeProber;
use crate::resolver::MetadataResolver;
use crate::sessions::{SessionStore, SessionToken, DEFAULT_SESSION_IDLE_SECS};

use callback::DownloadSelection;
use progress::StatusMessageSink;

/// Pause after a failed poll when the API gives no retry hint.
const POLL_RETRY_SECS: u64 = 3;

/// Upper bound on any poll backoff.
const POLL_MAX_RETRY_SECS: u64 = 60;

/// Default wait for running deliveries after polling stops.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum BotError {
    /// The token was refused; polling again cannot help.
    #[error("bot token rejected: {0}")]
    Unauthorized(TelegramApiError),

    #[error("telegram API error: {0}")]
    Telegram(#[from] TelegramApiError),
}

pub struct RelayBot {
    channel: TelegramChannel,
    resolver: Arc<dyn MetadataResolver>,
    prober: SizeProber,
    orchestrator: DeliveryOrchestrator,
    sessions: SessionStore,
    validator: SourceLinkValidator,
    /// Parent of every delivery's cancellation token.
    cancel: CancellationToken,
    /// Update handlers and the session sweeper.
    tasks: TaskTracker,
    poll_timeout_secs: u64,
    session_idle: Duration,
}

impl RelayBot {
    pub fn new(
        channel: TelegramChannel,
        resolver: Arc<dyn MetadataResolver>,
        prober: SizeProber,
        orchestrator: DeliveryOrchestrator,
        sessions: SessionStore,
        validator: SourceLinkValidator,
    ) -> Self {
        Self {
            channel,
            resolver,
            prober,
            orchestrator,
            sessions,
            validator,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            poll_timeout_secs: POLL_TIMEOUT_SECS,
            session_idle: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        }
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    pub fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Poll until `shutdown` flips to true.
    ///
    /// On return every running delivery has been cancelled and is falling
    /// through to the link fallback on its own task. Call [`Self::drain`]
    /// to wait for those tasks.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), BotError> {
        if let Err(e) = self.channel.delete_webhook(false).await {
            warn!(error = %e, "failed to clear webhook before polling");
        }
        self.spawn_session_sweeper();
        info!("polling for updates");

        let mut offset: i64 = 0;
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let polled = tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                polled = self.channel.get_updates(offset, self.poll_timeout_secs) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let bot = Arc::clone(&self);
                        self.tasks.spawn(async move {
                            bot.handle_update(update).await;
                        });
                    }
                }
                Err(e) if e.is_unauthorized() => break Err(BotError::Unauthorized(e)),
                Err(e) => {
                    let delay = e
                        .retry_after_secs
                        .unwrap_or(POLL_RETRY_SECS)
                        .clamp(1, POLL_MAX_RETRY_SECS);
                    warn!(error = %e, retry_in_secs = delay, "getUpdates failed");
                    tokio::select! {
                        _ = shutdown.changed() => break Ok(()),
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                    }
                }
            }
        };

        self.cancel.cancel();
        self.tasks.close();
        info!(in_flight = self.sessions.in_flight_count(), "polling stopped");
        result
    }

    /// Wait up to `grace` for update handlers to finish.
    ///
    /// Returns false when some were still running at the deadline.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if !drained {
            warn!(
                pending = self.tasks.len(),
                in_flight = self.sessions.in_flight_count(),
                "shutdown grace elapsed with handlers still running"
            );
        }
        drained
    }

    fn spawn_session_sweeper(&self) {
        let sessions = self.sessions.clone();
        let cancel = self.cancel.clone();
        let idle = self.session_idle;
        // Sweeping more often than every minute buys nothing.
        let period = (idle / 4).max(Duration::from_secs(60));
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = sessions.evict_idle(idle);
                        if evicted > 0 {
                            debug!(evicted, remaining = sessions.len(), "evicted idle sessions");
                        }
                    }
                }
            }
        });
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        } else if let Some(message) = update.message {
            self.handle_message(message).await;
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.channel.send_message(chat_id, text, None).await {
            warn!(chat_id, error = %e, "failed to send reply");
        }
    }

    async fn handle_message(&self, message: Message) {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref() else {
            return;
        };

        match command_name(text) {
            Some("start") => return self.reply(chat_id, replies::WELCOME).await,
            Some("help") => return self.reply(chat_id, replies::HELP).await,
            Some(other) => {
                debug!(chat_id, command = other, "unknown command");
                return self.reply(chat_id, replies::HELP).await;
            }
            None => {}
        }

        let link = match self.validator.validate(text) {
            Ok(link) => link,
            Err(e) => {
                debug!(chat_id, error = %e, "rejected message");
                return self.reply(chat_id, replies::INVALID_LINK).await;
            }
        };

        let status = match self.channel.send_message(chat_id, replies::SEARCHING, None).await {
            Ok(status) => status,
            Err(e) => {
                warn!(chat_id, error = %e, "failed to send status message");
                return;
            }
        };

        let mut resolution = match self.resolver.resolve(link).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(chat_id, error = %e, "resolution failed");
                if let Err(e) = self
                    .channel
                    .edit_message_text(chat_id, status.message_id, replies::NOT_FOUND, None)
                    .await
                {
                    debug!(chat_id, error = %e, "failed to edit status message");
                }
                return;
            }
        };

        let refined = self.prober.annotate(&mut resolution).await;
        info!(
            chat_id,
            resolution = %resolution.id,
            variants = resolution.variants.len(),
            sized = refined,
            "media resolved"
        );

        let summary = replies::resolution_summary(&resolution);
        let keyboard = replies::variant_keyboard(&resolution);
        let thumbnail = resolution.thumbnail_url.clone();
        self.sessions.store(&SessionToken::from(chat_id), resolution);

        if let Err(e) = self.channel.delete_message(chat_id, status.message_id).await {
            debug!(chat_id, error = %e, "failed to delete status message");
        }

        if let Some(thumbnail) = thumbnail {
            match self
                .channel
                .send_photo(chat_id, &thumbnail, &summary, Some(&keyboard))
                .await
            {
                Ok(_) => return,
                Err(e) => debug!(chat_id, error = %e, "thumbnail send failed; using text"),
            }
        }
        if let Err(e) = self.channel.send_message(chat_id, &summary, Some(&keyboard)).await {
            warn!(chat_id, error = %e, "failed to send quality keyboard");
        }
    }

    async fn answer(&self, query_id: &str, text: Option<&str>) {
        if let Err(e) = self.channel.answer_callback_query(query_id, text).await {
            debug!(error = %e, "failed to answer callback query");
        }
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let Some(message) = query.message else {
            return self.answer(&query.id, None).await;
        };
        let chat_id = message.chat.id;
        let token = SessionToken::from(chat_id);

        let Some(selection) = query.data.as_deref().and_then(DownloadSelection::parse) else {
            return self.answer(&query.id, Some(replies::SESSION_EXPIRED)).await;
        };

        let session = match self.sessions.resolve(&token) {
            Some(session) if session.resolution.id == selection.resolution_id => session,
            _ => {
                self.answer(&query.id, None).await;
                return self.edit_status(&message, replies::SESSION_EXPIRED).await;
            }
        };

        let Some(variant) = session.resolution.variant(selection.index).cloned() else {
            self.answer(&query.id, None).await;
            return self.edit_status(&message, replies::VARIANT_MISSING).await;
        };

        // Released on drop if this task unwinds before the outcome is recorded.
        let Some(claim) = self.sessions.try_begin_delivery(&token) else {
            return self.answer(&query.id, Some(replies::BUSY)).await;
        };
        self.answer(&query.id, None).await;

        let sink = StatusMessageSink::new(
            self.channel.clone(),
            chat_id,
            message.message_id,
            message.has_photo(),
            variant.kind,
            variant.quality_label.clone(),
        );
        let caption = replies::delivery_caption(&session.resolution.title, &variant);
        let target = chat_id.to_string();

        let outcome = self
            .orchestrator
            .deliver(
                DeliveryRequest {
                    target: &target,
                    variant: &variant,
                    caption: &caption,
                },
                &sink,
                &self.cancel.child_token(),
            )
            .await;

        claim.end_delivery(&outcome);
        sink.finish(&outcome).await;
    }

    /// Replace the keyboard message's text or caption.
    async fn edit_status(&self, message: &Message, text: &str) {
        progress::edit_status_message(
            &self.channel,
            message.chat.id,
            message.message_id,
            message.has_photo(),
            text,
            None,
        )
        .await;
    }
}

/// `/start@my_bot args` -> `start`.
fn command_name(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    command.split('@').next().filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("/start"), Some("start"));
        assert_eq!(command_name("  /help now"), Some("help"));
        assert_eq!(command_name("/start@relay_bot"), Some("start"));
        assert_eq!(command_name("https://fb.watch/x"), None);
        assert_eq!(command_name("/"), None);
        assert_eq!(command_name(""), None);
    }
}
