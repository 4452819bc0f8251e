//! Command handling module.
//!
//! Processes `/commands` sent to the bot in private chats and groups.
//! Moderation commands are limited to the configured admins.

mod handler;
mod types;

pub use handler::{CommandContext, CommandHandler, format_duration, truncate};
pub use types::{BotCommand, ChatAction, CommandResult};
