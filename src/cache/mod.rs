use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::StatusOr;

/// On-disk cache of tile images, keyed by URL.
///
/// Tile fragments are content-addressed upstream, so an entry never goes
/// stale. Writes go through a temporary file and a rename, which lets every
/// worker share one cache directory.
#[derive(Debug, Clone)]
pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    /// Open the cache rooted at `cache_dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> StatusOr<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the entry for `url`, if one has been stored
    pub fn entry(&self, url: &str) -> Option<PathBuf> {
        Some(self.entry_path(url)).filter(|path| path.is_file())
    }

    pub fn read(&self, url: &str) -> StatusOr<Option<Vec<u8>>> {
        match self.entry(url) {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// Store the bytes of `url`, replacing any earlier entry atomically
    pub fn store(&self, url: &str, data: &[u8]) -> StatusOr<PathBuf> {
        let file_path = self.entry_path(url);

        let mut tmp = NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&file_path).map_err(|e| e.error)?;

        Ok(file_path)
    }

    /// `<sha256 of url>.<extension of its last segment>` inside the cache directory
    fn entry_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        let extension = url
            .rsplit('/')
            .next()
            .and_then(|s| s.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .unwrap_or("");

        let file_name = if extension.is_empty() {
            hash
        } else {
            format!("{}.{}", hash, extension)
        };

        self.cache_dir.join(file_name)
    }

    /// Drop every entry, leaving an empty cache directory behind
    pub fn clear(&self) -> StatusOr<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }
}
