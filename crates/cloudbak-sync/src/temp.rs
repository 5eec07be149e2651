//! Scoped temporary files
//!
//! Intermediate payloads (archive, ciphertext, downloads) are held as
//! [`tempfile::TempPath`]s, so early returns and `?` never leave plaintext
//! or ciphertext copies behind. SQLite files additionally need their
//! journals removed, which [`TempDatabase`] takes care of.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

const SQLITE_JOURNALS: [&str; 3] = ["-wal", "-shm", "-journal"];

/// A new empty file in `dir`, deleted when the returned path drops
pub fn scratch_path(dir: &Path, suffix: &str) -> std::io::Result<TempPath> {
    Ok(tempfile::Builder::new()
        .prefix("cloudbak-")
        .suffix(suffix)
        .tempfile_in(dir)?
        .into_temp_path())
}

/// A SQLite database file removed together with its journals when dropped
#[derive(Debug)]
pub struct TempDatabase {
    path: TempPath,
}

impl TempDatabase {
    /// A new empty database file in `dir`
    pub fn new_in(dir: &Path) -> std::io::Result<Self> {
        Ok(Self {
            path: scratch_path(dir, ".sqlite")?,
        })
    }

    /// Takes ownership of an existing (or future) database path
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: TempPath::from_path(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in SQLITE_JOURNALS {
            let mut name = self.path.as_os_str().to_os_string();
            name.push(suffix);
            let journal = PathBuf::from(name);
            match std::fs::remove_file(&journal) {
                Ok(()) => debug!(path = %journal.display(), "Removed database journal"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %journal.display(), error = %e, "Failed to remove database journal"),
            }
        }
    }
}
