//! Telegram bot client on top of grammers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grammers_client::types::{Chat, InputMessage, Media, Message};
use grammers_client::update::Update;
use grammers_client::{Client, InvocationError, SenderPool, UpdatesConfiguration, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{ChatInfo, ChatKind, InboundEvent, IncomingMessage, Member, MessageKind};
use super::{BoundedMap, ChatGateway, RateLimiter};
use crate::config::TelegramConfig;

const EVENT_QUEUE: usize = 256;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Unknown chat or user: {0}")]
    UnknownPeer(i64),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lowered = err_msg.to_lowercase();
    ["flood_wait_", "flood wait "].iter().find_map(|pattern| {
        let start = lowered.find(pattern)? + pattern.len();
        let digits: String = lowered[start..].chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    })
}

/// Chats and users seen in updates, needed to address them later.
type PeerCache = Arc<RwLock<BoundedMap<i64, Chat>>>;

/// Telegram bot connection.
pub struct TelegramBot {
    client: Client,
    handle: sender::SenderPoolHandle,
    rate_limiter: RateLimiter,
    peers: PeerCache,
    events: Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    _pool_task: JoinHandle<()>,
    _update_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram and starts converting updates into events.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(config: &TelegramConfig, min_send_interval_ms: u64) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        if let Some(parent) = config.session_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TelegramError::Session(e.to_string()))?;
        }
        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool { runner, updates, handle } = SenderPool::new(Arc::clone(&session), config.api_id);
        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let peers: PeerCache = Arc::new(RwLock::new(BoundedMap::default()));
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let update_client = client.clone();
        let update_peers = Arc::clone(&peers);
        let update_task = tokio::spawn(async move {
            let mut stream = update_client.stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            );
            loop {
                match stream.next().await {
                    Ok(update) => {
                        for event in convert_update(update, &update_peers).await {
                            if tx.send(event).await.is_err() {
                                debug!("Event receiver dropped, stopping update loop");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Update stream error: {}", e);
                        return;
                    }
                }
            }
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;
        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            rate_limiter: RateLimiter::from_millis(min_send_interval_ms),
            peers,
            events: Mutex::new(Some(rx)),
            _pool_task: pool_task,
            _update_task: update_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Signs in as a bot with the token from @BotFather.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected.
    pub async fn bot_sign_in(&self, token: &str, api_hash: &str) -> Result<(), TelegramError> {
        info!("Signing in with bot token...");
        self.client
            .bot_sign_in(token, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))?;
        info!("Successfully signed in!");
        Ok(())
    }

    /// The bot's own id, username and name.
    ///
    /// # Errors
    ///
    /// Returns an error if not authorized or the call fails.
    pub async fn identity(&self) -> Result<crate::bot::BotIdentity, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }
        let me = self.client.get_me().await?;
        Ok(crate::bot::BotIdentity {
            user_id: me.id(),
            username: me.username().map(str::to_owned),
            name: me.full_name(),
        })
    }

    /// Takes the event stream. Only the first call gets it.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.events.lock().await.take()
    }

    async fn peer(&self, id: i64) -> Result<Chat, TelegramError> {
        self.peers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TelegramError::UnknownPeer(id))
    }

    /// Maps an invocation error, pausing sends on flood waits.
    async fn check<T>(&self, result: Result<T, InvocationError>) -> Result<T, TelegramError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err: TelegramError = e.into();
                if let TelegramError::FloodWait(seconds) = &err {
                    self.rate_limiter.handle_flood_wait(*seconds).await;
                }
                Err(err)
            }
        }
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

#[async_trait]
impl ChatGateway for TelegramBot {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        self.rate_limiter.wait_and_acquire(chat_id).await;
        debug!("Sending to {}: \"{}\"", chat_id, truncate_for_log(text, 40));
        let message = InputMessage::text(text).reply_to(reply_to);
        self.check(self.client.send_message(&chat, message).await).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        self.check(self.client.delete_messages(&chat, &[message_id]).await).await?;
        Ok(())
    }

    async fn restrict(&self, chat_id: i64, user_id: i64, until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        let rights = self.client.set_banned_rights(&chat, &user).send_messages(false);
        let result = match remaining(until) {
            Some(duration) => rights.duration(duration).await,
            None => rights.await,
        };
        self.check(result).await
    }

    async fn unrestrict(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        let result = self.client.set_banned_rights(&chat, &user).send_messages(true).await;
        self.check(result).await
    }

    async fn ban(&self, chat_id: i64, user_id: i64, until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        let rights = self.client.set_banned_rights(&chat, &user).view_messages(false);
        let result = match remaining(until) {
            Some(duration) => rights.duration(duration).await,
            None => rights.await,
        };
        self.check(result).await
    }

    async fn unban(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        let result = self.client.set_banned_rights(&chat, &user).view_messages(true).await;
        self.check(result).await
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

fn remaining(until: Option<DateTime<Utc>>) -> Option<std::time::Duration> {
    until.and_then(|at| (at - Utc::now()).to_std().ok())
}

async fn convert_update(update: Update, peers: &PeerCache) -> Vec<InboundEvent> {
    let Update::NewMessage(message) = update else {
        return Vec::new();
    };

    let chat = message.chat();
    let sender = message.sender();
    {
        let mut cache = peers.write().await;
        cache.insert(chat.id(), chat.clone());
        if let Some(sender) = &sender {
            cache.insert(sender.id(), sender.clone());
        }
    }

    let info = chat_info(&chat);
    let sender = sender.as_ref().map_or_else(|| unknown_member(info.id), member_of);

    if let Some(action) = message.action() {
        return membership_events(action, &info, &sender);
    }

    let reply_to = if message.reply_to_message_id().is_some() {
        match message.get_reply().await {
            Ok(Some(reply)) => reply.sender().as_ref().map(member_of),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not fetch replied-to message: {}", e);
                None
            }
        }
    } else {
        None
    };

    vec![InboundEvent::Message(IncomingMessage {
        id: message.id(),
        chat: info,
        sender,
        text: message.text().to_owned(),
        kind: message_kind(&message),
        outgoing: message.outgoing(),
        reply_to,
    })]
}

fn membership_events(action: &tl::enums::MessageAction, chat: &ChatInfo, sender: &Member) -> Vec<InboundEvent> {
    let joined = |user_id: i64| InboundEvent::MemberJoined {
        chat: chat.clone(),
        member: known_or_bare(user_id, sender),
    };
    match action {
        tl::enums::MessageAction::ChatAddUser(added) => added.users.iter().copied().map(joined).collect(),
        tl::enums::MessageAction::ChatJoinedByLink(_) | tl::enums::MessageAction::ChatJoinedByRequest => {
            vec![joined(sender.user_id)]
        }
        tl::enums::MessageAction::ChatDeleteUser(removed) => vec![InboundEvent::MemberLeft {
            chat: chat.clone(),
            member: known_or_bare(removed.user_id, sender),
        }],
        _ => Vec::new(),
    }
}

/// The sender when it is the affected user, otherwise an id-only member.
fn known_or_bare(user_id: i64, sender: &Member) -> Member {
    if sender.user_id == user_id {
        sender.clone()
    } else {
        Member {
            user_id,
            first_name: String::new(),
            last_name: None,
            username: None,
            is_bot: false,
        }
    }
}

fn chat_info(chat: &Chat) -> ChatInfo {
    let kind = match chat {
        Chat::User(_) => ChatKind::Private,
        Chat::Group(_) => ChatKind::Group,
        Chat::Channel(_) => ChatKind::Channel,
    };
    ChatInfo {
        id: chat.id(),
        kind,
        title: chat.name().to_owned(),
        member_count: None,
    }
}

fn member_of(chat: &Chat) -> Member {
    match chat {
        Chat::User(user) => Member {
            user_id: user.id(),
            first_name: user.full_name(),
            last_name: None,
            username: user.username().map(str::to_owned),
            is_bot: user.is_bot(),
        },
        other => Member {
            user_id: other.id(),
            first_name: other.name().to_owned(),
            last_name: None,
            username: other.username().map(str::to_owned),
            is_bot: false,
        },
    }
}

fn unknown_member(id: i64) -> Member {
    Member {
        user_id: id,
        first_name: String::new(),
        last_name: None,
        username: None,
        is_bot: false,
    }
}

fn message_kind(message: &Message) -> MessageKind {
    match message.media() {
        None => MessageKind::Text,
        Some(Media::Photo(_)) => MessageKind::Photo,
        Some(Media::Sticker(_)) => MessageKind::Sticker,
        Some(Media::Document(document)) => {
            let mime = document.mime_type().unwrap_or_default();
            if mime.starts_with("video/") {
                MessageKind::Video
            } else if mime.starts_with("audio/ogg") {
                MessageKind::Voice
            } else {
                MessageKind::Document
            }
        }
        Some(_) => MessageKind::Other,
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: i64, name: &str) -> Member {
        Member {
            user_id,
            first_name: name.to_owned(),
            last_name: None,
            username: None,
            is_bot: false,
        }
    }

    fn chat() -> ChatInfo {
        ChatInfo {
            id: -5,
            kind: ChatKind::Group,
            title: "G".to_owned(),
            member_count: None,
        }
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_membership_events() {
        let sender = member(7, "Ann");
        let added = tl::enums::MessageAction::ChatAddUser(tl::types::MessageActionChatAddUser { users: vec![7, 8] });
        let events = membership_events(&added, &chat(), &sender);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], InboundEvent::MemberJoined { member, .. } if member.first_name == "Ann"));
        assert!(matches!(&events[1], InboundEvent::MemberJoined { member, .. } if member.user_id == 8));

        let left = tl::enums::MessageAction::ChatDeleteUser(tl::types::MessageActionChatDeleteUser { user_id: 7 });
        let events = membership_events(&left, &chat(), &sender);
        assert!(matches!(&events[0], InboundEvent::MemberLeft { member, .. } if member.user_id == 7));
    }
}
