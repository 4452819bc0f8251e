//! Directory conventions for runtime data and static assets.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Result, StorageError};

/// Runtime data directory:
///
/// ```text
/// data/
///   cache/{images,voice,json}/
///   logs/
///   stats/usage.json
///   backups/
///   nomi.db
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    #[must_use]
    pub fn image_cache(&self) -> PathBuf {
        self.cache_dir().join("images")
    }

    #[must_use]
    pub fn voice_cache(&self) -> PathBuf {
        self.cache_dir().join("voice")
    }

    #[must_use]
    pub fn json_cache(&self) -> PathBuf {
        self.cache_dir().join("json")
    }

    /// The three cache subdirectories.
    #[must_use]
    pub fn cache_dirs(&self) -> [PathBuf; 3] {
        [self.image_cache(), self.voice_cache(), self.json_cache()]
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[must_use]
    pub fn stats_dir(&self) -> PathBuf {
        self.root.join("stats")
    }

    #[must_use]
    pub fn usage_file(&self) -> PathBuf {
        self.stats_dir().join("usage.json")
    }

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    #[must_use]
    pub fn database_file(&self) -> PathBuf {
        self.root.join("nomi.db")
    }

    /// Creates every directory of the layout. Safe to call repeatedly.
    pub fn ensure(&self) -> Result<()> {
        let [images, voice, json] = self.cache_dirs();
        for dir in [
            images,
            voice,
            json,
            self.logs_dir(),
            self.stats_dir(),
            self.backups_dir(),
        ] {
            create_dir(&dir)?;
        }
        debug!("Data layout ready at {}", self.root.display());
        Ok(())
    }
}

/// Static assets directory with `fonts/` and `templates/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    root: PathBuf,
}

impl AssetLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn fonts_dir(&self) -> PathBuf {
        self.root.join("fonts")
    }

    #[must_use]
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn ensure(&self) -> Result<()> {
        create_dir(&self.fonts_dir())?;
        create_dir(&self.templates_dir())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| StorageError::DirectoryCreate {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = DataLayout::new("data");
        assert_eq!(layout.usage_file(), PathBuf::from("data/stats/usage.json"));
        assert_eq!(layout.database_file(), PathBuf::from("data/nomi.db"));
        assert_eq!(layout.voice_cache(), PathBuf::from("data/cache/voice"));
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("data"));
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        for path in layout.cache_dirs() {
            assert!(path.is_dir());
        }
        assert!(layout.backups_dir().is_dir());
        assert!(layout.logs_dir().is_dir());

        let assets = AssetLayout::new(dir.path().join("assets"));
        assets.ensure().unwrap();
        assert!(assets.fonts_dir().is_dir());
        assert!(assets.templates_dir().is_dir());
    }
}
