//! Age-based cache eviction.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use super::DataLayout;

/// Outcome of a cache sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes_freed: u64,
}

/// Deletes stale files from the cache directories.
#[derive(Debug, Clone)]
pub struct CacheJanitor {
    dirs: Vec<PathBuf>,
}

impl CacheJanitor {
    #[must_use]
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            dirs: layout.cache_dirs().to_vec(),
        }
    }

    /// Removes regular files last modified more than `max_age` before `now`.
    /// Entries that cannot be inspected or removed are skipped.
    pub fn sweep(&self, max_age: Duration, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        for dir in &self.dirs {
            sweep_dir(dir, max_age, now, &mut report);
        }
        if report.removed > 0 {
            info!(
                "Cache sweep removed {} files ({} bytes)",
                report.removed, report.bytes_freed
            );
        }
        report
    }
}

fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime, report: &mut SweepReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("Cannot read cache dir {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.removed += 1;
                report.bytes_freed += metadata.len();
            }
            Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_removes_only_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure().unwrap();

        let old = layout.image_cache().join("old.png");
        let fresh = layout.json_cache().join("fresh.json");
        std::fs::write(&old, b"12345").unwrap();
        std::fs::write(&fresh, b"{}").unwrap();
        std::fs::create_dir(layout.voice_cache().join("nested")).unwrap();

        let janitor = CacheJanitor::new(&layout);
        let now = SystemTime::now();

        // Nothing is older than an hour yet.
        assert_eq!(janitor.sweep(Duration::from_secs(3600), now), SweepReport::default());

        // Two hours later with a one-hour budget, both files are stale.
        let later = now + Duration::from_secs(7200);
        let report = janitor.sweep(Duration::from_secs(3600), later);
        assert_eq!(report.removed, 2);
        assert_eq!(report.bytes_freed, 7);
        assert!(!old.exists());
        assert!(layout.voice_cache().join("nested").is_dir());
    }

    #[test]
    fn test_missing_dirs_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = CacheJanitor::new(&DataLayout::new(dir.path().join("nope")));
        assert_eq!(janitor.sweep(Duration::ZERO, SystemTime::now()), SweepReport::default());
    }
}
