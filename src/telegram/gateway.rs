//! Outbound chat operations used by the dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::TelegramError;

/// The actions the bot takes in chats. `until: None` means forever.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<(), TelegramError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TelegramError>;

    /// Removes the right to send messages.
    async fn restrict(&self, chat_id: i64, user_id: i64, until: Option<DateTime<Utc>>) -> Result<(), TelegramError>;

    async fn unrestrict(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError>;

    async fn ban(&self, chat_id: i64, user_id: i64, until: Option<DateTime<Utc>>) -> Result<(), TelegramError>;

    async fn unban(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError>;
}
