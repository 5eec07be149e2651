//! Source tree walker (secondary/driven adapter)
//!
//! Implements [`IFileWalker`] with `walkdir`.
//!
//! ## Design Decisions
//!
//! - **Ignore rules are substrings**: a path is dropped when it contains any
//!   configured pattern (e.g. `/.git/`). A directory whose path matches is
//!   not descended into, since every descendant would match as well.
//! - **Regular files only**: symlinks are not followed and not reported.
//! - **Byte order**: results are sorted the way SQLite's `ORDER BY path`
//!   sorts them.
//! - Paths that are not valid UTF-8 are skipped with a warning; the
//!   inventory key-space is UTF-8.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use cloudbak_core::ports::IFileWalker;

use crate::SyncError;

/// Adapter that bridges the [`IFileWalker`] port to the real filesystem
#[derive(Debug, Clone, Default)]
pub struct WalkDirScanner {
    ignore_patterns: Vec<String>,
}

impl WalkDirScanner {
    /// Create a walker dropping every path that contains one of `ignore_patterns`
    #[must_use]
    pub fn new(ignore_patterns: Vec<String>) -> Self {
        Self {
            ignore_patterns: ignore_patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    /// Whether `path` contains any ignore pattern
    pub fn is_ignored(&self, path: &str) -> bool {
        contains_any(path, &self.ignore_patterns)
    }

    fn walk_blocking(&self, root: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let unreadable = || SyncError::SourceUnreadable(root.to_path_buf());
        let meta = std::fs::metadata(root).map_err(|_| unreadable())?;
        if !meta.is_dir() {
            return Err(unreadable());
        }
        // an unreadable root surfaces here instead of as an empty listing
        std::fs::read_dir(root).map_err(|_| unreadable())?;

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || entry
                        .path()
                        .to_str()
                        .map(|p| !self.is_ignored(p))
                        .unwrap_or(true)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = entry.path().to_str().map(str::to_owned) else {
                warn!(path = ?entry.path(), "Skipping non UTF-8 path");
                continue;
            };
            files.push((path, entry.into_path()));
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

/// Whether `path` contains any non-empty pattern
pub fn contains_any(path: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| !p.is_empty() && path.contains(p.as_str()))
}

// ============================================================================
// Archive unit members
// ============================================================================

/// The files a scan puts into the archive unit of `dir`: regular files
/// directly inside it, not ignored and matching a compress pattern, sorted
/// by path
#[instrument(skip(ignore_patterns, compress_leaves_patterns), fields(dir = %dir.display()))]
pub async fn archive_members(
    dir: &Path,
    ignore_patterns: &[String],
    compress_leaves_patterns: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    let ignore = ignore_patterns.to_vec();
    let compress = compress_leaves_patterns.to_vec();
    let members = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
        let mut members: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(path) = entry.path().to_str().map(str::to_owned) else {
                continue;
            };
            if contains_any(&path, &ignore) || !contains_any(&path, &compress) {
                continue;
            }
            members.push((path, entry.path()));
        }
        members.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(members.into_iter().map(|(_, path)| path).collect())
    })
    .await??;
    debug!(members = members.len(), "Archive members listed");
    Ok(members)
}

#[async_trait::async_trait]
impl IFileWalker for WalkDirScanner {
    #[instrument(skip(self), fields(root = %root.display()))]
    async fn walk(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let walker = self.clone();
        let root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walker.walk_blocking(&root)).await??;
        debug!(files = files.len(), "Walk complete");
        Ok(files)
    }
}

// ============================================================================
// Tests
// ============================================================================
