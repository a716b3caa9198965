//! Persistent storage for the serialized token cache.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CacheError;

/// Byte-oriented durable storage for one serialized cache.
///
/// Implementations are blocking; they are called while the cache lock is held.
pub trait CacheStore: Send + Sync {
    /// Read the stored bytes; `None` if nothing has been stored yet.
    fn read(&self) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replace the stored bytes.
    fn write(&self, bytes: &[u8]) -> Result<(), CacheError>;
}

/// Cache store backed by a single JSON file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!("Read {} bytes from {:?}", bytes.len(), self.path);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache file {:?} does not exist", self.path);
                Ok(None)
            }
            Err(e) => Err(CacheError::Read(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(CacheError::Write)?;
            }
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).map_err(CacheError::Write)?;
        file.write_all(bytes).map_err(CacheError::Write)?;
        file.sync_all().map_err(CacheError::Write)?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(CacheError::Write)?;

        debug!("Wrote {} bytes to {:?}", bytes.len(), self.path);
        Ok(())
    }
}
