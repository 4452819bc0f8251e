//! State shared by the dispatcher, the command handler and the scheduler.

use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::autoreply::AutoReplyEngine;
use crate::backup::BackupManager;
use crate::badges::BadgeEngine;
use crate::config::{BotSettings, ContentConfig, ContentError};
use crate::greeting::{GoodbyeEngine, WelcomeEngine};
use crate::moderation::Moderator;
use crate::ranks::RankEngine;
use crate::reminders::ReminderBook;
use crate::stats::StatsEngine;
use crate::storage::Database;
use crate::telegram::{BoundedMap, Member};

/// One point in time on every clock the engines use.
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    pub instant: Instant,
    pub local: DateTime<Local>,
}

impl Moment {
    #[must_use]
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            local: Local::now(),
        }
    }

    #[must_use]
    pub fn utc(&self) -> DateTime<Utc> {
        self.local.with_timezone(&Utc)
    }
}

/// Who the bot is signed in as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: i64,
    pub username: Option<String>,
    pub name: String,
}

/// Names of users seen in chats, for `@username` targets and leaderboards.
/// Holds a bounded number of users; the longest-known are forgotten first.
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_username: BoundedMap<String, i64>,
    names: BoundedMap<i64, String>,
}

impl UserDirectory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_username: BoundedMap::new(capacity),
            names: BoundedMap::new(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn remember(&mut self, member: &Member) {
        if let Some(username) = &member.username {
            self.by_username.insert(username.to_lowercase(), member.user_id);
        }
        self.names.insert(member.user_id, member.display_name());
    }

    /// Resolves `@name` or a numeric id.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<i64> {
        match reference.strip_prefix('@') {
            Some(name) => self.by_username.get(&name.to_lowercase()).copied(),
            None => reference.parse().ok(),
        }
    }

    #[must_use]
    pub fn name(&self, user_id: i64) -> String {
        self.names
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| format!("User {user_id}"))
    }
}

#[derive(Debug)]
pub struct BotServices {
    pub settings: BotSettings,
    pub identity: BotIdentity,
    pub moderator: Mutex<Moderator>,
    pub database: Mutex<Database>,
    pub ranks: RankEngine,
    pub badges: BadgeEngine,
    pub reminders: ReminderBook,
    pub stats: Mutex<StatsEngine>,
    pub auto_reply: Mutex<AutoReplyEngine>,
    pub welcome: Mutex<WelcomeEngine>,
    pub goodbye: Mutex<GoodbyeEngine>,
    pub backups: BackupManager,
    pub users: Mutex<UserDirectory>,
    pub started_at: Instant,
}

impl BotServices {
    #[must_use]
    pub fn new(
        settings: BotSettings,
        identity: BotIdentity,
        content: ContentConfig,
        database: Database,
        stats: StatsEngine,
        backups: BackupManager,
    ) -> Self {
        let moderator = Moderator::new(&content.moderation, settings.features);
        let auto_reply = AutoReplyEngine::new(content.auto_reply, Some(settings.content_dir.clone()));
        let welcome = WelcomeEngine::new(content.welcome, identity.name.clone());
        let goodbye = GoodbyeEngine::new(content.goodbye, identity.name.clone());
        let reminders = ReminderBook::new(settings.max_reminders_per_user);
        Self {
            settings,
            identity,
            moderator: Mutex::new(moderator),
            database: Mutex::new(database),
            ranks: RankEngine::default(),
            badges: BadgeEngine,
            reminders,
            stats: Mutex::new(stats),
            auto_reply: Mutex::new(auto_reply),
            welcome: Mutex::new(welcome),
            goodbye: Mutex::new(goodbye),
            backups,
            users: Mutex::new(UserDirectory::default()),
            started_at: Instant::now(),
        }
    }

    /// Re-reads the content directory and swaps it into every engine.
    /// On error the running content is kept.
    pub async fn reload_content(&self) -> Result<ContentConfig, ContentError> {
        let content = ContentConfig::load_from_dir(&self.settings.content_dir)?;
        content.validate()?;

        self.moderator.lock().await.reload(&content.moderation);
        self.auto_reply.lock().await.reload(content.auto_reply.clone());
        self.welcome.lock().await.reload(content.welcome.clone());
        self.goodbye.lock().await.reload(content.goodbye.clone());
        info!("Content reloaded from {}", self.settings.content_dir.display());
        Ok(content)
    }

    /// Logs a moderation action, warning on database failure.
    pub async fn log_action(
        &self,
        chat_id: i64,
        user_id: i64,
        action: &str,
        reason: &str,
        duration_secs: Option<u64>,
        at: DateTime<Utc>,
    ) {
        let db = self.database.lock().await;
        if let Err(e) = db.log_action(chat_id, user_id, action, reason, duration_secs, at) {
            tracing::warn!("Failed to record {} of {}: {}", action, user_id, e);
        }
    }
}
