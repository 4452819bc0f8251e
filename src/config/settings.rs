//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Bot token issued by `@BotFather`. Prompted for when missing.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("data/bot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            bot_token: None,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set. `BOT_TOKEN` and
    /// `TG_SESSION_PATH` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let bot_token = std::env::var("BOT_TOKEN")
            .ok()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());

        let session_path = std::env::var("TG_SESSION_PATH")
            .map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_path,
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("session_path", &self.session_path)
            .finish()
    }
}

/// Feature switches, all enabled by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    pub welcome: bool,
    pub goodbye: bool,
    pub auto_reply: bool,
    pub anti_spam: bool,
    pub anti_flood: bool,
    pub anti_links: bool,
    pub anti_bad_words: bool,
    pub ranks: bool,
    pub reminders: bool,
    pub badges: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            welcome: true,
            goodbye: true,
            auto_reply: true,
            anti_spam: true,
            anti_flood: true,
            anti_links: true,
            anti_bad_words: true,
            ranks: true,
            reminders: true,
            badges: true,
        }
    }
}

impl Features {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            welcome: env_flag("WELCOME_ENABLED", defaults.welcome),
            goodbye: env_flag("GOODBYE_ENABLED", defaults.goodbye),
            auto_reply: env_flag("AUTO_REPLY_ENABLED", defaults.auto_reply),
            anti_spam: env_flag("ANTI_SPAM", defaults.anti_spam),
            anti_flood: env_flag("ANTI_FLOOD", defaults.anti_flood),
            anti_links: env_flag("ANTI_LINKS", defaults.anti_links),
            anti_bad_words: env_flag("ANTI_BAD_WORDS", defaults.anti_bad_words),
            ranks: env_flag("ENABLE_RANKS", defaults.ranks),
            reminders: env_flag("ENABLE_REMINDERS", defaults.reminders),
            badges: env_flag("ENABLE_BADGES", defaults.badges),
        }
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// User ids allowed to run admin commands.
    #[serde(default)]
    pub admin_ids: Vec<i64>,

    /// Root of the data directory (cache, logs, stats, backups, database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the static assets directory.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Directory holding the JSON content files.
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// Minimum interval between outgoing messages in milliseconds.
    #[serde(default = "default_min_send_interval")]
    pub min_send_interval_ms: u64,

    /// Interval between automatic backups in seconds (0 disables them).
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,

    /// How many days backup archives are kept.
    #[serde(default = "default_backup_retention")]
    pub backup_retention_days: u64,

    /// Maximum age of cached files in seconds.
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,

    /// Pending reminders one user may hold.
    #[serde(default = "default_max_reminders")]
    pub max_reminders_per_user: usize,

    /// Enabled features.
    #[serde(default)]
    pub features: Features,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_min_send_interval() -> u64 {
    300
}

fn default_backup_interval() -> u64 {
    86_400 // daily
}

fn default_backup_retention() -> u64 {
    30
}

fn default_cache_max_age() -> u64 {
    86_400
}

fn default_max_reminders() -> usize {
    crate::reminders::DEFAULT_MAX_PER_USER
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            data_dir: default_data_dir(),
            assets_dir: default_assets_dir(),
            content_dir: default_content_dir(),
            min_send_interval_ms: default_min_send_interval(),
            backup_interval_secs: default_backup_interval(),
            backup_retention_days: default_backup_retention(),
            cache_max_age_secs: default_cache_max_age(),
            max_reminders_per_user: default_max_reminders(),
            features: Features::default(),
            log_level: default_log_level(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            admin_ids: std::env::var("ADMIN_IDS")
                .map(|s| parse_admin_ids(&s))
                .unwrap_or_default(),
            data_dir: std::env::var("DATA_DIR").map_or_else(|_| default_data_dir(), PathBuf::from),
            assets_dir: std::env::var("ASSETS_DIR")
                .map_or_else(|_| default_assets_dir(), PathBuf::from),
            content_dir: std::env::var("CONTENT_DIR")
                .map_or_else(|_| default_content_dir(), PathBuf::from),
            min_send_interval_ms: env_number("MIN_SEND_INTERVAL_MS")
                .unwrap_or_else(default_min_send_interval),
            backup_interval_secs: env_number("BACKUP_INTERVAL_SECS")
                .unwrap_or_else(default_backup_interval),
            backup_retention_days: env_number("BACKUP_RETENTION_DAYS")
                .unwrap_or_else(default_backup_retention),
            cache_max_age_secs: env_number("CACHE_MAX_AGE_SECS")
                .unwrap_or_else(default_cache_max_age),
            max_reminders_per_user: env_number("MAX_REMINDERS_PER_USER")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_else(default_max_reminders),
            features: Features::from_env(),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level()),
        }
    }

    /// Checks whether a user id belongs to a configured admin.
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Backup interval, `None` when automatic backups are disabled.
    #[must_use]
    pub fn backup_interval(&self) -> Option<Duration> {
        (self.backup_interval_secs > 0).then(|| Duration::from_secs(self.backup_interval_secs))
    }

    #[must_use]
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }
}

/// Parses a comma or whitespace separated list of user ids, skipping junk.
fn parse_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or(default)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
