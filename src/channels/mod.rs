//! Channels module
//!
//! Messaging platforms the relay talks through. Telegram is both the chat
//! surface and the media destination.

pub mod telegram;

pub use telegram::{TelegramApiError, TelegramChannel};
