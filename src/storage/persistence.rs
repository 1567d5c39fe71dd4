//! File-backed persistence: one snapshot file per key, replaced atomically.

use super::adapter::PersistenceAdapter;
use crate::core::{Result, SyncError};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SNAPSHOT_EXTENSION: &str = "snapshot";

pub struct FileAdapter {
    root: PathBuf,
}

impl FileAdapter {
    /// Opens (and creates if needed) the data directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            SyncError::Persistence(format!(
                "Failed to create data directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize_key(key), SNAPSHOT_EXTENSION))
    }
}

impl PersistenceAdapter for FileAdapter {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Persistence(format!(
                    "Failed to open snapshot '{}': {}",
                    path.display(),
                    e
                )));
            }
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| {
            SyncError::Persistence(format!("Failed to read snapshot '{}': {}", path.display(), e))
        })?;
        Ok(Some(data))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let mut temp = NamedTempFile::new_in(&self.root)
            .map_err(|e| SyncError::Persistence(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(bytes)
            .map_err(|e| SyncError::Persistence(format!("Failed to write snapshot: {}", e)))?;
        temp.flush()
            .map_err(|e| SyncError::Persistence(format!("Failed to flush snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SyncError::Persistence(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&path).map_err(|e| {
            SyncError::Persistence(format!(
                "Failed to rename snapshot into '{}': {}",
                path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
