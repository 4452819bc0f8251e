//! Timestamped `tar.gz` backups of the bot's state with age-based retention.

mod archive;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::storage::{DataLayout, StorageError};

pub const DEFAULT_RETENTION_DAYS: u64 = 30;
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to snapshot database {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("Backup task failed: {0}")]
    Task(String),
}

/// How a source is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Plain files, copied byte for byte.
    Files,
    /// A live `SQLite` database, captured with `VACUUM INTO`.
    Sqlite,
}

/// A file or directory to back up, stored under `name` in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSource {
    pub path: PathBuf,
    pub name: String,
    pub kind: SourceKind,
}

impl BackupSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind: SourceKind::Files,
        }
    }

    #[must_use]
    pub fn database(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Sqlite,
            ..Self::new(path, name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub sources: Vec<BackupSource>,
    pub backup_root: PathBuf,
    pub retention_days: u64,
}

impl BackupPlan {
    /// The bot's database, logs, statistics, content files and `.env`,
    /// archived into the data directory's `backups/`.
    #[must_use]
    pub fn for_layout(layout: &DataLayout, content_dir: &Path, env_file: &Path, retention_days: u64) -> Self {
        Self {
            sources: vec![
                BackupSource::database(layout.database_file(), "db/nomi.db"),
                BackupSource::new(layout.logs_dir(), "logs"),
                BackupSource::new(layout.stats_dir(), "stats"),
                BackupSource::new(content_dir, "content"),
                BackupSource::new(env_file, ".env"),
            ],
            backup_root: layout.backups_dir(),
            retention_days,
        }
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(86_400))
    }

    /// Sources present on disk and those that would be skipped.
    #[must_use]
    pub fn partition_sources(&self) -> (Vec<&BackupSource>, Vec<&BackupSource>) {
        self.sources.iter().partition(|s| s.path.exists())
    }

    /// Archives the next run would delete.
    #[must_use]
    pub fn expired_archives(&self, now: SystemTime) -> Vec<PathBuf> {
        archive::expired_archives(&self.backup_root, self.retention(), now)
    }
}

/// Outcome of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub archive: PathBuf,
    pub bytes: u64,
    /// Files copied into the archive.
    pub copied: usize,
    pub skipped: Vec<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

impl BackupReport {
    #[must_use]
    pub fn summary(&self) -> String {
        let name = self
            .archive
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let mut text = format!(
            "💾 Backup created: {name}\n📦 {} files, {}",
            self.copied,
            format_bytes(self.bytes)
        );
        if !self.skipped.is_empty() {
            text.push_str(&format!("\n⚠️ {} sources missing", self.skipped.len()));
        }
        if !self.pruned.is_empty() {
            text.push_str(&format!("\n🧹 {} old backups removed", self.pruned.len()));
        }
        text
    }
}

fn format_bytes(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if value >= 1_048_576.0 {
        format!("{:.1} MB", value / 1_048_576.0)
    } else if value >= 1024.0 {
        format!("{:.1} KB", value / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Runs backups one at a time; scheduled and manual runs share it.
#[derive(Debug)]
pub struct BackupManager {
    plan: Arc<BackupPlan>,
    running: Mutex<()>,
}

impl BackupManager {
    #[must_use]
    pub fn new(plan: BackupPlan) -> Self {
        Self {
            plan: Arc::new(plan),
            running: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn plan(&self) -> &BackupPlan {
        &self.plan
    }

    /// Creates `<backup_root>/<YYYYmmdd_HHMMSS>.tar.gz` and prunes archives
    /// past the retention period.
    pub async fn run(&self, now: DateTime<Local>) -> Result<BackupReport, BackupError> {
        let _guard = self.running.lock().await;

        let stamp = now.format(STAMP_FORMAT).to_string();
        info!("Starting backup {}", stamp);
        let plan = Arc::clone(&self.plan);
        let report = tokio::task::spawn_blocking(move || archive::run(&plan, &stamp, SystemTime::from(now)))
            .await
            .map_err(|e| BackupError::Task(e.to_string()))??;

        info!(
            "Backup written to {} ({} bytes, {} files, {} pruned)",
            report.archive.display(),
            report.bytes,
            report.copied,
            report.pruned.len()
        );
        Ok(report)
    }
}
