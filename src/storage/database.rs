//! `SQLite` persistence for ranks, the moderation log, reminders, badges
//! and activity streaks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{Result, StorageError, migrations};

/// Persisted rank state of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankRecord {
    pub user_id: i64,
    pub xp: u64,
    pub level: u32,
    pub messages_sent: u64,
    pub commands_used: u64,
    pub updated_at: DateTime<Utc>,
}

impl RankRecord {
    #[must_use]
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            xp: 0,
            level: 1,
            messages_sent: 0,
            commands_used: 0,
            updated_at: now,
        }
    }
}

/// One row of the moderation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationEntry {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub action: String,
    pub reason: String,
    pub duration_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A stored reminder or scheduled announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRecord {
    /// Assigned on insert; ignored by [`Database::add_reminder`].
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
    /// Announcements are posted as-is, without the reminder header.
    pub announcement: bool,
    /// `daily`, `weekly` or `monthly`; `None` fires once.
    pub repeat: Option<String>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A badge a user holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeAward {
    pub badge_id: String,
    pub awarded_at: DateTime<Utc>,
}

/// Message count and daily streak of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub user_id: i64,
    pub first_seen: DateTime<Utc>,
    pub last_active_day: Option<NaiveDate>,
    pub current_streak: u32,
    pub best_streak: u32,
    pub messages: u64,
}

impl ActivityRecord {
    #[must_use]
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            first_seen: now,
            last_active_day: None,
            current_streak: 0,
            best_streak: 0,
            messages: 0,
        }
    }
}

const SNAPSHOT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    conn: Connection,
}

impl Database {
    /// Opens or creates the database, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| StorageError::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database ready at {}", path.display());
        Ok(Self { path, conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| StorageError::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        migrations::initialize_schema(&conn)?;
        Ok(Self { path, conn })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a consistent copy of the database at `source` to `dest`,
    /// including pages still sitting in the write-ahead log. `dest` must
    /// not exist. Safe to call while another connection is writing.
    pub fn snapshot(source: &Path, dest: &Path) -> Result<()> {
        let conn = Connection::open_with_flags(
            source,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source_err| StorageError::DatabaseOpen {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        conn.busy_timeout(SNAPSHOT_BUSY_TIMEOUT)?;
        conn.execute("VACUUM INTO ?1", [dest.to_string_lossy()])?;
        debug!("Snapshot of {} written to {}", source.display(), dest.display());
        Ok(())
    }

    pub fn load_rank(&self, user_id: i64) -> Result<Option<RankRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT user_id, xp, level, messages_sent, commands_used, updated_at
                 FROM user_ranks WHERE user_id = ?1",
                [user_id],
                rank_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn save_rank(&self, record: &RankRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_ranks (user_id, xp, level, messages_sent, commands_used, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                xp = excluded.xp,
                level = excluded.level,
                messages_sent = excluded.messages_sent,
                commands_used = excluded.commands_used,
                updated_at = excluded.updated_at",
            params![
                record.user_id,
                to_sql_int(record.xp),
                record.level,
                to_sql_int(record.messages_sent),
                to_sql_int(record.commands_used),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Highest-XP users first.
    pub fn top_ranks(&self, limit: usize) -> Result<Vec<RankRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, xp, level, messages_sent, commands_used, updated_at
             FROM user_ranks ORDER BY xp DESC, user_id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([to_sql_int(limit as u64)], rank_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Appends a moderation action, returning its row id.
    pub fn log_action(
        &self,
        chat_id: i64,
        user_id: i64,
        action: &str,
        reason: &str,
        duration_secs: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO moderation_log (chat_id, user_id, action, reason, duration_secs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat_id,
                user_id,
                action,
                reason,
                duration_secs.map(to_sql_int),
                at.to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent actions in a chat, newest first.
    pub fn recent_actions(&self, chat_id: i64, limit: usize) -> Result<Vec<ModerationEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chat_id, user_id, action, reason, duration_secs, created_at
             FROM moderation_log WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, to_sql_int(limit as u64)], |row| {
            Ok(ModerationEntry {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                user_id: row.get(2)?,
                action: row.get(3)?,
                reason: row.get(4)?,
                duration_secs: row.get::<_, Option<i64>>(5)?.map(from_sql_int),
                created_at: parse_time(row, 6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// Reminders
impl Database {
    /// Stores a reminder, returning its id.
    pub fn add_reminder(&self, reminder: &ReminderRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO reminders (user_id, chat_id, text, announcement, repeat, due_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reminder.user_id,
                reminder.chat_id,
                reminder.text,
                reminder.announcement,
                reminder.repeat,
                reminder.due_at.timestamp(),
                reminder.created_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Pending reminders a user created, soonest first.
    pub fn reminders_of(&self, user_id: i64) -> Result<Vec<ReminderRecord>> {
        self.query_reminders("WHERE user_id = ?1 ORDER BY due_at, id", params![user_id])
    }

    pub fn count_reminders(&self, user_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reminders WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Reminders due at or before `now`, oldest first.
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>> {
        self.query_reminders("WHERE due_at <= ?1 ORDER BY due_at, id", params![now.timestamp()])
    }

    /// Deletes a reminder. With `owner` set, only that user's reminder is
    /// touched. Returns whether a row was deleted.
    pub fn delete_reminder(&self, id: i64, owner: Option<i64>) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM reminders WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
            params![id, owner],
        )?;
        Ok(deleted > 0)
    }

    pub fn reschedule_reminder(&self, id: i64, due_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE reminders SET due_at = ?2 WHERE id = ?1",
            params![id, due_at.timestamp()],
        )?;
        Ok(())
    }

    fn query_reminders(&self, filter: &str, args: impl rusqlite::Params) -> Result<Vec<ReminderRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, user_id, chat_id, text, announcement, repeat, due_at, created_at
             FROM reminders {filter}"
        ))?;
        let rows = stmt.query_map(args, |row| {
            let due: i64 = row.get(6)?;
            Ok(ReminderRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                chat_id: row.get(2)?,
                text: row.get(3)?,
                announcement: row.get(4)?,
                repeat: row.get(5)?,
                due_at: DateTime::from_timestamp(due, 0).unwrap_or_default(),
                created_at: parse_time(row, 7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// Badges and activity
impl Database {
    /// Records a badge; returns `false` when the user already had it.
    pub fn award_badge(&self, user_id: i64, badge_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_badges (user_id, badge_id, awarded_at) VALUES (?1, ?2, ?3)",
            params![user_id, badge_id, at.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Badges of a user in the order they were earned.
    pub fn badges_of(&self, user_id: i64) -> Result<Vec<BadgeAward>> {
        let mut stmt = self.conn.prepare(
            "SELECT badge_id, awarded_at FROM user_badges
             WHERE user_id = ?1 ORDER BY awarded_at, badge_id",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok(BadgeAward {
                badge_id: row.get(0)?,
                awarded_at: parse_time(row, 1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn load_activity(&self, user_id: i64) -> Result<Option<ActivityRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT user_id, first_seen, last_active_day, current_streak, best_streak, messages
                 FROM user_activity WHERE user_id = ?1",
                [user_id],
                |row| {
                    let day: Option<String> = row.get(2)?;
                    Ok(ActivityRecord {
                        user_id: row.get(0)?,
                        first_seen: parse_time(row, 1)?,
                        last_active_day: day.and_then(|d| d.parse().ok()),
                        current_streak: row.get(3)?,
                        best_streak: row.get(4)?,
                        messages: from_sql_int(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn save_activity(&self, record: &ActivityRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_activity
                (user_id, first_seen, last_active_day, current_streak, best_streak, messages)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                last_active_day = excluded.last_active_day,
                current_streak = excluded.current_streak,
                best_streak = excluded.best_streak,
                messages = excluded.messages",
            params![
                record.user_id,
                record.first_seen.to_rfc3339(),
                record.last_active_day.map(|d| d.to_string()),
                record.current_streak,
                record.best_streak,
                to_sql_int(record.messages),
            ],
        )?;
        Ok(())
    }
}

fn rank_from_row(row: &Row<'_>) -> rusqlite::Result<RankRecord> {
    Ok(RankRecord {
        user_id: row.get(0)?,
        xp: from_sql_int(row.get(1)?),
        level: row.get(2)?,
        messages_sent: from_sql_int(row.get(3)?),
        commands_used: from_sql_int(row.get(4)?),
        updated_at: parse_time(row, 5)?,
    })
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

// SQLite integers are signed; counters saturate rather than wrap.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_rank_round_trip_and_update() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_rank(1).unwrap().is_none());

        let mut record = RankRecord::new(1, at(0));
        record.xp = 120;
        record.level = 2;
        db.save_rank(&record).unwrap();
        assert_eq!(db.load_rank(1).unwrap(), Some(record.clone()));

        record.xp = 600;
        record.messages_sent = 60;
        record.updated_at = at(10);
        db.save_rank(&record).unwrap();
        assert_eq!(db.load_rank(1).unwrap().unwrap().xp, 600);
    }

    #[test]
    fn test_top_ranks_order() {
        let db = Database::open_in_memory().unwrap();
        for (user, xp) in [(1, 50), (2, 500), (3, 200)] {
            let mut record = RankRecord::new(user, at(0));
            record.xp = xp;
            db.save_rank(&record).unwrap();
        }
        let top: Vec<i64> = db.top_ranks(2).unwrap().iter().map(|r| r.user_id).collect();
        assert_eq!(top, vec![2, 3]);
    }

    #[test]
    fn test_moderation_log() {
        let db = Database::open_in_memory().unwrap();
        db.log_action(-10, 5, "mute", "flood", Some(60), at(0)).unwrap();
        db.log_action(-10, 6, "ban", "scam", None, at(1)).unwrap();
        db.log_action(-20, 7, "warn", "caps", None, at(2)).unwrap();

        let recent = db.recent_actions(-10, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "ban");
        assert_eq!(recent[0].duration_secs, None);
        assert_eq!(recent[1].duration_secs, Some(60));
        assert_eq!(recent[1].created_at, at(0));
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("nomi.db");
        {
            let db = Database::open(&path).unwrap();
            db.save_rank(&RankRecord::new(9, at(0))).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.path(), path.as_path());
        assert!(db.load_rank(9).unwrap().is_some());
    }

    fn reminder(user_id: i64, due: i64) -> ReminderRecord {
        ReminderRecord {
            id: 0,
            user_id,
            chat_id: -10,
            text: format!("due at {due}"),
            announcement: false,
            repeat: None,
            due_at: at(due),
            created_at: at(0),
        }
    }

    #[test]
    fn test_reminders_due_and_owned() {
        let db = Database::open_in_memory().unwrap();
        let late = db.add_reminder(&reminder(1, 600)).unwrap();
        let early = db.add_reminder(&reminder(1, 60)).unwrap();
        db.add_reminder(&reminder(2, 120)).unwrap();

        let mine: Vec<i64> = db.reminders_of(1).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(mine, vec![early, late]);
        assert_eq!(db.count_reminders(1).unwrap(), 2);

        let due = db.due_reminders(at(120)).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].due_at, at(60));

        db.reschedule_reminder(early, at(900)).unwrap();
        assert_eq!(db.due_reminders(at(120)).unwrap().len(), 1);

        assert!(!db.delete_reminder(late, Some(2)).unwrap());
        assert!(db.delete_reminder(late, Some(1)).unwrap());
        assert!(db.delete_reminder(early, None).unwrap());
        assert_eq!(db.count_reminders(1).unwrap(), 0);
    }

    #[test]
    fn test_badges_awarded_once() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.award_badge(4, "chatty", at(0)).unwrap());
        assert!(!db.award_badge(4, "chatty", at(5)).unwrap());
        assert!(db.award_badge(4, "first_message", at(1)).unwrap());

        let ids: Vec<String> = db.badges_of(4).unwrap().into_iter().map(|b| b.badge_id).collect();
        assert_eq!(ids, vec!["chatty", "first_message"]);
    }

    #[test]
    fn test_activity_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_activity(8).unwrap().is_none());

        let mut record = ActivityRecord::new(8, at(0));
        record.last_active_day = NaiveDate::from_ymd_opt(2024, 2, 29);
        record.current_streak = 3;
        record.best_streak = 5;
        record.messages = 42;
        db.save_activity(&record).unwrap();
        assert_eq!(db.load_activity(8).unwrap(), Some(record));
    }

    #[test]
    fn test_snapshot_includes_uncheckpointed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nomi.db");
        let live = Database::open(&path).unwrap();
        let mut record = RankRecord::new(3, at(0));
        record.xp = 1234;
        live.save_rank(&record).unwrap();

        // The live connection stays open, so the row is still in the WAL.
        let copy = dir.path().join("copy.db");
        Database::snapshot(&path, &copy).unwrap();
        assert!(!dir.path().join("copy.db-wal").exists());

        let restored = Database::open(&copy).unwrap();
        assert_eq!(restored.load_rank(3).unwrap().map(|r| r.xp), Some(1234));
        drop(live);
    }

    #[test]
    fn test_snapshot_of_missing_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::snapshot(&dir.path().join("absent.db"), &dir.path().join("copy.db"));
        assert!(matches!(result, Err(StorageError::DatabaseOpen { .. })));
        assert!(!dir.path().join("absent.db").exists());
    }
}
