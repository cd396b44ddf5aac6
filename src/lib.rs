//! reelay library
//!
//! Resolves social video links and relays the media to Telegram under hard
//! size and time ceilings: by reference first, then by fetching and
//! re-uploading the bytes, and finally by handing the user the link.

pub mod bot;
pub mod channels;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod links;
pub mod logging;
pub mod media;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod sessions;
