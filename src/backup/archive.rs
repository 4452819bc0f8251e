//! Blocking filesystem work behind a backup run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use super::{BackupError, BackupPlan, BackupReport, BackupSource, SourceKind};
use crate::storage::Database;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError {
    let path = path.to_path_buf();
    move |source| BackupError::Io { path, source }
}

/// Copies, archives and prunes. `stamp` names the staging directory and
/// the archive.
pub(super) fn run(plan: &BackupPlan, stamp: &str, now: SystemTime) -> Result<BackupReport, BackupError> {
    fs::create_dir_all(&plan.backup_root).map_err(io_error(&plan.backup_root))?;

    let staging = plan.backup_root.join(stamp);
    fs::create_dir_all(&staging).map_err(io_error(&staging))?;

    let mut copied = 0;
    let mut skipped = Vec::new();
    for source in &plan.sources {
        if !source.path.exists() {
            debug!("Backup source {} is missing", source.path.display());
            skipped.push(source.path.clone());
            continue;
        }
        copied += capture(source, &staging.join(&source.name))?;
    }

    let archive = plan.backup_root.join(format!("{stamp}{ARCHIVE_SUFFIX}"));
    let packed = write_archive(&archive, stamp, &staging);
    // The staging copy goes away whether or not packing worked.
    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!("Failed to remove staging directory {}: {}", staging.display(), e);
    }
    packed?;

    let bytes = fs::metadata(&archive).map_err(io_error(&archive))?.len();
    let pruned = prune(&plan.backup_root, plan.retention(), now, &archive);

    Ok(BackupReport {
        archive,
        bytes,
        copied,
        skipped,
        pruned,
    })
}

fn capture(source: &BackupSource, to: &Path) -> Result<usize, BackupError> {
    match source.kind {
        SourceKind::Files => copy_recursive(&source.path, to),
        SourceKind::Sqlite => {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            Database::snapshot(&source.path, to).map_err(|e| BackupError::Snapshot {
                path: source.path.clone(),
                source: e,
            })?;
            Ok(1)
        }
    }
}

/// Copies a file or directory tree, returning the number of files copied.
fn copy_recursive(from: &Path, to: &Path) -> Result<usize, BackupError> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::copy(from, to).map_err(io_error(from))?;
        return Ok(1);
    }

    fs::create_dir_all(to).map_err(io_error(to))?;
    let mut count = 0;
    for entry in fs::read_dir(from).map_err(io_error(from))? {
        let entry = entry.map_err(io_error(from))?;
        let path = entry.path();
        if path.is_dir() || path.is_file() {
            count += copy_recursive(&path, &to.join(entry.file_name()))?;
        }
    }
    Ok(count)
}

fn write_archive(archive: &Path, stamp: &str, staging: &Path) -> Result<(), BackupError> {
    let file = File::create(archive).map_err(io_error(archive))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(stamp, staging).map_err(io_error(staging))?;
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(io_error(archive))?;
    Ok(())
}

/// Archives in `root` whose modification time is older than `retention`.
pub(super) fn expired_archives(root: &Path, retention: Duration, now: SystemTime) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(ARCHIVE_SUFFIX))
        })
        .filter(|path| {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > retention)
        })
        .collect()
}

fn prune(root: &Path, retention: Duration, now: SystemTime, keep: &Path) -> Vec<PathBuf> {
    let mut pruned = Vec::new();
    for path in expired_archives(root, retention, now) {
        if path == keep {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed old backup {}", path.display());
                pruned.push(path);
            }
            Err(e) => warn!("Failed to remove old backup {}: {}", path.display(), e),
        }
    }
    pruned
}
