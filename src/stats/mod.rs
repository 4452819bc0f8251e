//! Usage statistics persisted to `stats/usage.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Recorded messages between automatic saves.
const SAVE_EVERY: u32 = 10;

const DAY_FORMAT: &str = "%Y-%m-%d";
const HOUR_FORMAT: &str = "%Y-%m-%d %H:00";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyStats {
    pub total_messages: u64,
    pub text_messages: u64,
    pub other_messages: u64,
    pub users: BTreeSet<i64>,
    pub chats: BTreeSet<i64>,
    pub joins: u64,
    pub leaves: u64,
    pub total_length: u64,
}

impl DailyStats {
    #[must_use]
    pub fn average_length(&self) -> f64 {
        average(self.total_length, self.text_messages)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyStats {
    pub messages: u64,
    pub users: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_messages: u64,
    pub last_message: DateTime<Local>,
    #[serde(default)]
    pub kinds: BTreeMap<String, u64>,
    #[serde(default)]
    pub total_length: u64,
}

impl UserStats {
    #[must_use]
    pub fn average_length(&self) -> f64 {
        average(self.total_length, self.kinds.get("text").copied().unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStats {
    pub total_messages: u64,
    #[serde(default)]
    pub active_users: BTreeSet<i64>,
    pub last_activity: DateTime<Local>,
    #[serde(default)]
    pub joins: u64,
    #[serde(default)]
    pub leaves: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub users: BTreeSet<i64>,
}

/// The whole `usage.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageData {
    pub daily: BTreeMap<String, DailyStats>,
    pub hourly: BTreeMap<String, HourlyStats>,
    pub users: BTreeMap<i64, UserStats>,
    pub chats: BTreeMap<i64, ChatStats>,
    pub commands: BTreeMap<String, CommandStats>,
}

#[derive(Debug)]
pub struct StatsEngine {
    path: PathBuf,
    data: UsageData,
    unsaved: u32,
}

impl StatsEngine {
    /// Loads statistics from `path`, starting empty when the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StatsError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StatsError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsageData::default(),
            Err(source) => return Err(StatsError::Io { path, source }),
        };
        debug!("Loaded stats for {} users from {}", data.users.len(), path.display());
        Ok(Self {
            path,
            data,
            unsaved: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn data(&self) -> &UsageData {
        &self.data
    }

    /// Records a message. `chat_id` is `None` for private chats. Saves to
    /// disk every few messages.
    pub fn record_message(
        &mut self,
        user_id: i64,
        chat_id: Option<i64>,
        kind: &str,
        length: usize,
        now: DateTime<Local>,
    ) -> Result<(), StatsError> {
        let length = length as u64;
        let is_text = kind == "text";

        let daily = self.day_mut(now);
        daily.total_messages += 1;
        if is_text {
            daily.text_messages += 1;
            daily.total_length += length;
        } else {
            daily.other_messages += 1;
        }
        daily.users.insert(user_id);
        if let Some(chat) = chat_id {
            daily.chats.insert(chat);
        }

        let hourly = self
            .data
            .hourly
            .entry(now.format(HOUR_FORMAT).to_string())
            .or_default();
        hourly.messages += 1;
        hourly.users.insert(user_id);

        let user = self.data.users.entry(user_id).or_insert_with(|| UserStats {
            total_messages: 0,
            last_message: now,
            kinds: BTreeMap::new(),
            total_length: 0,
        });
        user.total_messages += 1;
        user.last_message = now;
        *user.kinds.entry(kind.to_owned()).or_insert(0) += 1;
        if is_text {
            user.total_length += length;
        }

        if let Some(chat) = chat_id {
            let stats = self.chat_mut(chat, now);
            stats.total_messages += 1;
            stats.active_users.insert(user_id);
            stats.last_activity = now;
        }

        self.unsaved += 1;
        if self.unsaved >= SAVE_EVERY {
            self.save()?;
        }
        Ok(())
    }

    pub fn record_join(&mut self, chat_id: i64, now: DateTime<Local>) {
        self.day_mut(now).joins += 1;
        let chat = self.chat_mut(chat_id, now);
        chat.joins += 1;
        chat.last_activity = now;
    }

    pub fn record_leave(&mut self, chat_id: i64, now: DateTime<Local>) {
        self.day_mut(now).leaves += 1;
        let chat = self.chat_mut(chat_id, now);
        chat.leaves += 1;
        chat.last_activity = now;
    }

    pub fn record_command(&mut self, user_id: i64, command: &str, success: bool) {
        let stats = self.data.commands.entry(command.to_owned()).or_default();
        stats.total += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        stats.users.insert(user_id);
    }

    fn day_mut(&mut self, now: DateTime<Local>) -> &mut DailyStats {
        self.data
            .daily
            .entry(now.format(DAY_FORMAT).to_string())
            .or_default()
    }

    fn chat_mut(&mut self, chat_id: i64, now: DateTime<Local>) -> &mut ChatStats {
        self.data.chats.entry(chat_id).or_insert_with(|| ChatStats {
            total_messages: 0,
            active_users: BTreeSet::new(),
            last_activity: now,
            joins: 0,
            leaves: 0,
        })
    }

    #[must_use]
    pub fn daily(&self, date: NaiveDate) -> Option<&DailyStats> {
        self.data.daily.get(&date.format(DAY_FORMAT).to_string())
    }

    #[must_use]
    pub fn user(&self, user_id: i64) -> Option<&UserStats> {
        self.data.users.get(&user_id)
    }

    #[must_use]
    pub fn chat(&self, chat_id: i64) -> Option<&ChatStats> {
        self.data.chats.get(&chat_id)
    }

    /// Most used commands first.
    #[must_use]
    pub fn top_commands(&self, n: usize) -> Vec<(&str, &CommandStats)> {
        let mut commands: Vec<_> = self
            .data
            .commands
            .iter()
            .map(|(name, stats)| (name.as_str(), stats))
            .collect();
        commands.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
        commands.truncate(n);
        commands
    }

    /// Activity score in `0..=100`.
    #[must_use]
    pub fn activity_score(&self, user_id: i64, now: DateTime<Local>) -> f64 {
        let Some(user) = self.user(user_id) else {
            return 0.0;
        };
        #[allow(clippy::cast_precision_loss)]
        let mut score = (user.total_messages as f64 * 0.1).min(30.0);
        if now.signed_duration_since(user.last_message) < Duration::hours(24) {
            score += 20.0;
        }
        if user.kinds.len() > 1 {
            #[allow(clippy::cast_precision_loss)]
            let diversity = (user.kinds.len() as f64 * 5.0).min(15.0);
            score += diversity;
        }
        score.min(100.0)
    }

    /// Drops entries older than `max_age_days`, returning how many went.
    pub fn cleanup(&mut self, max_age_days: i64, now: DateTime<Local>) -> usize {
        let cutoff = now - Duration::days(max_age_days);
        let cutoff_day = cutoff.date_naive();
        let before = self.entry_count();

        self.data.daily.retain(|key, _| {
            NaiveDate::parse_from_str(key, DAY_FORMAT).is_ok_and(|d| d >= cutoff_day)
        });
        self.data.hourly.retain(|key, _| {
            NaiveDateTime::parse_from_str(&format!("{key}:00"), "%Y-%m-%d %H:%M:%S")
                .is_ok_and(|t| t.date() >= cutoff_day)
        });
        self.data.users.retain(|_, u| u.last_message >= cutoff);
        self.data.chats.retain(|_, c| c.last_activity >= cutoff);

        let removed = before - self.entry_count();
        if removed > 0 {
            info!("Removed {} old stats entries", removed);
        }
        removed
    }

    fn entry_count(&self) -> usize {
        self.data.daily.len() + self.data.hourly.len() + self.data.users.len() + self.data.chats.len()
    }

    /// Short report for the `/stats` command.
    #[must_use]
    pub fn summary(&self, now: DateTime<Local>) -> String {
        let today = self.daily(now.date_naive()).cloned().unwrap_or_default();
        let mut lines = vec![
            "📊 Statistics".to_owned(),
            format!(
                "Today: {} messages from {} users",
                today.total_messages,
                today.users.len()
            ),
            format!("Joins/leaves today: {}/{}", today.joins, today.leaves),
            format!("Average message length: {:.1}", today.average_length()),
            format!("Known users: {}", self.data.users.len()),
        ];
        let top = self.top_commands(3);
        if !top.is_empty() {
            let names: Vec<String> = top.iter().map(|(name, s)| format!("/{name} ({})", s.total)).collect();
            lines.push(format!("Top commands: {}", names.join(", ")));
        }
        lines.join("\n")
    }

    /// Writes `usage.json` atomically through a temporary file.
    pub fn save(&mut self) -> Result<(), StatsError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let content = serde_json::to_string_pretty(&self.data).map_err(|source| StatsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;

        self.unsaved = 0;
        debug!("Stats saved to {}", self.path.display());
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StatsError {
    let path = path.to_path_buf();
    move |source| StatsError::Io { path, source }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let avg = total as f64 / count as f64;
    avg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, hour, 15, 0).unwrap()
    }

    fn engine(dir: &tempfile::TempDir) -> StatsEngine {
        StatsEngine::load(dir.path().join("stats").join("usage.json")).unwrap()
    }

    #[test]
    fn test_record_message_updates_all_views() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        stats.record_message(1, Some(-5), "text", 10, at(1, 9)).unwrap();
        stats.record_message(2, Some(-5), "text", 20, at(1, 9)).unwrap();
        stats.record_message(1, None, "photo", 0, at(1, 10)).unwrap();

        let day = stats.daily(at(1, 0).date_naive()).unwrap();
        assert_eq!(day.total_messages, 3);
        assert_eq!(day.other_messages, 1);
        assert_eq!(day.users.len(), 2);
        assert!((day.average_length() - 15.0).abs() < 1e-9);

        assert_eq!(stats.data().hourly["2024-03-01 09:00"].messages, 2);
        assert_eq!(stats.user(1).unwrap().kinds.len(), 2);
        assert_eq!(stats.chat(-5).unwrap().active_users.len(), 2);
    }

    #[test]
    fn test_auto_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        for _ in 0..9 {
            stats.record_message(1, Some(-1), "text", 3, at(2, 12)).unwrap();
        }
        assert!(!stats.path().exists());
        stats.record_message(1, Some(-1), "text", 3, at(2, 12)).unwrap();
        assert!(stats.path().exists());

        let reloaded = engine(&dir);
        assert_eq!(reloaded.user(1).unwrap().total_messages, 10);
        assert_eq!(reloaded.data(), stats.data());
    }

    #[test]
    fn test_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        stats.record_command(1, "rank", true);
        stats.record_command(2, "rank", false);
        stats.record_command(1, "help", true);
        let top = stats.top_commands(1);
        assert_eq!(top[0].0, "rank");
        assert_eq!((top[0].1.successful, top[0].1.failed), (1, 1));
        assert!(stats.summary(at(1, 1)).contains("/rank (2)"));
    }

    #[test]
    fn test_activity_score() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        assert!(stats.activity_score(1, at(1, 1)).abs() < 1e-9);
        for _ in 0..5 {
            stats.record_message(1, None, "text", 1, at(1, 8)).unwrap();
        }
        stats.record_message(1, None, "voice", 0, at(1, 8)).unwrap();
        // 6 messages -> 0.6, recent -> 20, two kinds -> 10
        assert!((stats.activity_score(1, at(1, 9)) - 30.6).abs() < 1e-9);
        assert!((stats.activity_score(1, at(5, 9)) - 10.6).abs() < 1e-9);
    }

    #[test]
    fn test_cleanup_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        stats.record_message(1, Some(-1), "text", 1, at(1, 1)).unwrap();
        stats.record_message(2, Some(-2), "text", 1, at(20, 1)).unwrap();
        let removed = stats.cleanup(10, at(25, 0));
        assert_eq!(removed, 4);
        assert!(stats.user(1).is_none());
        assert!(stats.user(2).is_some());
        assert!(stats.chat(-1).is_none());
    }

    #[test]
    fn test_join_and_leave() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = engine(&dir);
        stats.record_join(-3, at(4, 4));
        stats.record_leave(-3, at(4, 5));
        let day = stats.daily(at(4, 0).date_naive()).unwrap();
        assert_eq!((day.joins, day.leaves), (1, 1));
        assert_eq!(stats.chat(-3).unwrap().joins, 1);
    }
}
