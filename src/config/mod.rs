//! Configuration module for the bot.
//!
//! Environment-driven settings and credentials live in `settings`; the
//! JSON content files (auto-replies, greetings, moderation lists) in
//! `content`.

mod content;
mod settings;

pub use content::{
    AUTO_REPLY_FILE, AutoReplyConfig, ContentConfig, ContentError, GOODBYE_FILE, GreetingConfig,
    MODERATION_FILE, ReplyRule, WELCOME_FILE,
};
pub(crate) use content::write_json;
pub use settings::{BotSettings, ConfigError, Features, TelegramConfig};
