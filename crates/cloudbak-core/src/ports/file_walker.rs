//! Filesystem walker port (driven/secondary port)

use std::path::{Path, PathBuf};

/// Enumerates the regular files under a source root
#[async_trait::async_trait]
pub trait IFileWalker: Send + Sync {
    /// Every regular file below `root`, sorted by path, with ignored
    /// paths already removed.
    ///
    /// An unreadable `root` is an error; unreadable entries below it are
    /// skipped.
    async fn walk(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>>;
}
