//! On-disk state: the data and asset directory layout, cache eviction and
//! the `SQLite` database.

mod cache;
mod database;
mod layout;
mod migrations;

use std::path::PathBuf;

use thiserror::Error;

pub use cache::{CacheJanitor, SweepReport};
pub use database::{ActivityRecord, BadgeAward, Database, ModerationEntry, RankRecord, ReminderRecord};
pub use layout::{AssetLayout, DataLayout};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open database at {path}: {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Database migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
