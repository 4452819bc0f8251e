//! Schema versioning for the bot database.

use rusqlite::{Connection, OptionalExtension};

use super::{Result, StorageError};

const VERSION_KEY: &str = "schema_version";

const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Migrations in order; version N is `MIGRATIONS[N - 1]`.
const MIGRATIONS: &[&str] = &[
    // v1: ranks and the moderation log
    r"
    CREATE TABLE IF NOT EXISTS user_ranks (
        user_id INTEGER PRIMARY KEY,
        xp INTEGER NOT NULL DEFAULT 0,
        level INTEGER NOT NULL DEFAULT 1,
        messages_sent INTEGER NOT NULL DEFAULT 0,
        commands_used INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_user_ranks_xp ON user_ranks(xp DESC);
    CREATE TABLE IF NOT EXISTS moderation_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        reason TEXT NOT NULL,
        duration_secs INTEGER,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_moderation_log_chat ON moderation_log(chat_id, id DESC);
    ",
    // v2: reminders, badges and per-user activity streaks
    r"
    CREATE TABLE IF NOT EXISTS reminders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        chat_id INTEGER NOT NULL,
        text TEXT NOT NULL,
        announcement INTEGER NOT NULL DEFAULT 0,
        repeat TEXT,
        due_at INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(due_at);
    CREATE INDEX IF NOT EXISTS idx_reminders_user ON reminders(user_id);
    CREATE TABLE IF NOT EXISTS user_badges (
        user_id INTEGER NOT NULL,
        badge_id TEXT NOT NULL,
        awarded_at TEXT NOT NULL,
        PRIMARY KEY (user_id, badge_id)
    );
    CREATE TABLE IF NOT EXISTS user_activity (
        user_id INTEGER PRIMARY KEY,
        first_seen TEXT NOT NULL,
        last_active_day TEXT,
        current_streak INTEGER NOT NULL DEFAULT 0,
        best_streak INTEGER NOT NULL DEFAULT 0,
        messages INTEGER NOT NULL DEFAULT 0
    );
    ",
];

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const fn current_version() -> i32 {
    MIGRATIONS.len() as i32
}

/// Brings the schema up to the current version.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let version = schema_version(conn)?;
    if version > current_version() {
        return Err(StorageError::Migration(format!(
            "database version {version} is newer than supported {}",
            current_version()
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(usize::try_from(version).unwrap_or(0)) {
        conn.execute_batch(sql)?;
        let applied = i32::try_from(index + 1)
            .map_err(|_| StorageError::Migration("too many migrations".to_owned()))?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (VERSION_KEY, applied.to_string()),
        )?;
    }
    Ok(())
}

/// Stored schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    value.map_or(Ok(0), |v| {
        v.parse()
            .map_err(|_| StorageError::Migration(format!("invalid schema version: {v}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_fresh_database_is_migrated() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(table_exists(&conn, "user_ranks"));
        assert!(table_exists(&conn, "moderation_log"));
        assert!(table_exists(&conn, "reminders"));
        assert!(table_exists(&conn, "user_badges"));
        assert!(table_exists(&conn, "user_activity"));
        assert_eq!(schema_version(&conn).unwrap(), current_version());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_version_one_database_is_upgraded() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, '1')",
            [VERSION_KEY],
        )
        .unwrap();

        initialize_schema(&conn).unwrap();
        assert!(table_exists(&conn, "reminders"));
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_newer_database_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '99' WHERE key = ?1",
            [VERSION_KEY],
        )
        .unwrap();
        assert!(matches!(initialize_schema(&conn), Err(StorageError::Migration(_))));
    }
}
