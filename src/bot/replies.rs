//! User-facing texts and keyboards.

use super::callback::DownloadSelection;
use crate::channels::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};
use crate::delivery::{DeliveryOutcome, DeliveryStage, FallbackReason};
use crate::media::{format_size, MediaKind, MediaResolution, MediaVariant};

pub const WELCOME: &str = "🎬 Facebook Video Downloader\n\n\
Send me a link to a Facebook video or reel and I will send you the video \
in the quality you pick.\n\n\
🔗 Supported links:\n\
• Facebook Video\n\
• Facebook Reel\n\
• Facebook Watch\n\
• fb.watch short links\n\n\
👇 Send a Facebook video link now!";

pub const HELP: &str = "❓ Help\n\n\
/start - start the bot\n\
/help - show this help\n\n\
1️⃣ Copy the link of a Facebook video\n\
2️⃣ Paste it here\n\
3️⃣ Pick a quality\n\
4️⃣ The video arrives in this chat\n\n\
⚠️ Only public videos can be downloaded.";

pub const INVALID_LINK: &str = "❌ That is not a valid Facebook link.\n\n\
✅ Please send a Facebook video or reel link, for example:\n\
https://www.facebook.com/reel/569975832234512";

pub const SEARCHING: &str = "⏳ Looking up the video... please wait.";

pub const NOT_FOUND: &str = "❌ Video not found.\n\n\
Possible reasons:\n\
• The video is private\n\
• The link is wrong\n\
• The video was deleted";

pub const SESSION_EXPIRED: &str = "❌ This selection has expired. Please send the link again.";

pub const VARIANT_MISSING: &str = "❌ Download link not found.";

pub const BUSY: &str = "⏳ A download is already running. Please wait for it to finish.";

/// Text shown under the thumbnail with the quality keyboard.
pub fn resolution_summary(resolution: &MediaResolution) -> String {
    format!(
        "✅ Video found!\n\n\
📌 Title: {}\n\
👤 Author: {}\n\
⏱ Duration: {}\n\n\
👇 Pick a quality below:",
        resolution.title,
        resolution.author,
        resolution.duration_label()
    )
}

fn kind_icon(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "📹",
        MediaKind::Audio => "🎵",
    }
}

/// One button per variant, in resolution order.
pub fn variant_keyboard(resolution: &MediaResolution) -> InlineKeyboardMarkup {
    let buttons = resolution
        .variants
        .iter()
        .enumerate()
        .map(|(index, variant)| {
            InlineKeyboardButton::callback(
                format!("{} {}", kind_icon(variant.kind), variant.display_label()),
                DownloadSelection::new(&resolution.id, index).encode(),
            )
        })
        .collect();
    InlineKeyboardMarkup::single_column(buttons)
}

/// Caption attached to the delivered media.
pub fn delivery_caption(title: &str, variant: &MediaVariant) -> String {
    match variant.kind {
        MediaKind::Video => format!("✅ {}\n📹 Quality: {}", title, variant.quality_label),
        MediaKind::Audio => format!("✅ {}\n🎵 Audio", title),
    }
}

/// Status line for an in-progress delivery.
///
/// `None` for [`DeliveryStage::Completed`]; the final text comes from
/// [`outcome_status`].
pub fn stage_status(stage: DeliveryStage, quality: &str, size_label: &str) -> Option<String> {
    let text = match stage {
        DeliveryStage::SendingReference => format!("⬇️ Sending {quality}... please wait."),
        DeliveryStage::Downloading => format!("⬇️ Downloading {quality} ({size_label})..."),
        DeliveryStage::Uploading => format!("⬆️ Uploading {quality} ({size_label})..."),
        DeliveryStage::FallingBackToLink => {
            format!("⚠️ Could not send {quality} directly. Preparing a download link...")
        }
        DeliveryStage::Completed => return None,
    };
    Some(text)
}

fn quality_line(kind: MediaKind, quality: &str) -> String {
    match kind {
        MediaKind::Video => format!("📹 Quality: {quality}"),
        MediaKind::Audio => "🎵 Audio".to_string(),
    }
}

fn fallback_explanation(reason: &FallbackReason) -> String {
    match reason {
        FallbackReason::ExceedsCeiling { ceiling, .. } => {
            format!("the file is larger than {}", format_size(*ceiling))
        }
        FallbackReason::Fetch(_) | FallbackReason::Upload(_) | FallbackReason::TierPanicked { .. } => {
            "the transfer did not go through".to_string()
        }
    }
}

/// Final status text and optional keyboard for a finished delivery.
pub fn outcome_status(
    outcome: &DeliveryOutcome,
    kind: MediaKind,
    quality: &str,
) -> (String, Option<InlineKeyboardMarkup>) {
    let line = quality_line(kind, quality);
    match outcome {
        DeliveryOutcome::SentByReference | DeliveryOutcome::SentByUpload(_) => {
            (format!("✅ Sent successfully!\n\n{line}"), None)
        }
        DeliveryOutcome::DeliveredAsLink { url, reason } => (
            format!(
                "⚠️ The {kind} could not be sent directly because {}.\n\
Tap the button below to download it.\n\n\
{line}",
                fallback_explanation(reason)
            ),
            Some(InlineKeyboardMarkup::single_column(vec![
                InlineKeyboardButton::url(format!("⬇️ Download {quality}"), url),
            ])),
        ),
        DeliveryOutcome::Failed(message) => (format!("❌ {message}"), None),
    }
}
