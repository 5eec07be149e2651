//! DirectoryStore - a local directory acting as the backup bucket
//!
//! Object `/a/b` lives at `<root>/a/b`. Writes go to a sibling temporary
//! file first and are renamed into place, so a listing never shows a
//! partially written object. Storage classes and metadata have no effect.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tracing::debug;
use walkdir::WalkDir;

use cloudbak_core::ports::{IObjectStore, ObjectInfo, UploadRequest};

use crate::StorageError;

const PARTIAL_PREFIX: &str = ".cloudbak-";
const PARTIAL_SUFFIX: &str = ".part";

/// Transport storing objects as plain files under `root`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` under the root, refusing anything that could escape it
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = key
            .strip_prefix('/')
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Whether `name` is an in-flight copy made by [`copy_atomic`]
fn is_partial(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Copies `from` to `to` through a temporary sibling
async fn copy_atomic(from: &Path, to: &Path) -> anyhow::Result<u64> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
        let parent = to.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let mut partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(parent)
            .with_context(|| format!("Failed to create a temporary file in {}", parent.display()))?;
        let mut source = std::fs::File::open(&from)
            .with_context(|| format!("Failed to open {}", from.display()))?;
        let copied = std::io::copy(&mut source, partial.as_file_mut())
            .with_context(|| format!("Failed to copy {}", from.display()))?;
        partial
            .persist(&to)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move {} into place", to.display()))?;
        Ok(copied)
    })
    .await?
}

fn list_blocking(root: &Path, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    if !root.exists() {
        return Ok(objects);
    }

    for entry in WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut key = String::new();
        for component in relative.components() {
            key.push('/');
            key.push_str(&component.as_os_str().to_string_lossy());
        }
        let partial = entry.file_name().to_str().is_some_and(is_partial);
        if partial || !key.starts_with(prefix) {
            continue;
        }
        let metadata = entry.metadata()?;
        objects.push(ObjectInfo {
            key,
            size: metadata.len(),
            timestamp: modified_millis(&metadata),
        });
    }
    Ok(objects)
}

#[async_trait::async_trait]
impl IObjectStore for DirectoryStore {
    async fn upload(&self, request: &UploadRequest) -> anyhow::Result<()> {
        let target = self.object_path(&request.key)?;
        debug!(
            key = %request.key,
            class = %request.storage_class,
            "DirectoryStore::upload"
        );

        let copied = copy_atomic(&request.local_path, &target).await?;
        if request.expected_size > 0 && copied != request.expected_size {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(StorageError::SizeMismatch {
                key: request.key.clone(),
                expected: request.expected_size,
                actual: copied,
            }
            .into());
        }
        Ok(())
    }

    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<()> {
        let source = self.object_path(key)?;
        debug!(key, dest = %dest.display(), "DirectoryStore::download");
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()).into());
        }
        copy_atomic(&source, dest).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let target = self.object_path(key)?;
        debug!(key, "DirectoryStore::delete");
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            // deleting an absent object succeeds, as it does on S3
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", target.display())),
        }
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
        debug!(prefix, "DirectoryStore::list");
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_blocking(&root, &prefix)).await?
    }
}
