//! Object storage port (driven/secondary port)
//!
//! This module defines the interface to the single backup bucket. Keys
//! always begin with `/` and are relative to the bucket root.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result`; the session treats any error as a transient
//!   transfer failure and never inspects its cause.
//! - Calls are awaited one at a time by every caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::StorageClass;

/// One upload to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// File to read the payload from
    pub local_path: PathBuf,
    /// Destination key, starting with `/`
    pub key: String,
    /// Payload size the caller measured; 0 when unknown
    pub expected_size: u64,
    pub storage_class: StorageClass,
    /// User metadata attached to the object
    pub metadata: BTreeMap<String, String>,
}

impl UploadRequest {
    pub fn new(
        local_path: impl Into<PathBuf>,
        key: impl Into<String>,
        expected_size: u64,
        storage_class: StorageClass,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            key: key.into(),
            expected_size,
            storage_class,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// An object reported by a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Key starting with `/`
    pub key: String,
    pub size: u64,
    /// Last modification time, epoch milliseconds
    pub timestamp: i64,
}

/// Port trait for the backup bucket
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Uploads a local file
    async fn upload(&self, request: &UploadRequest) -> anyhow::Result<()>;

    /// Downloads an object to `dest`, replacing any existing file
    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<()>;

    /// Deletes an object
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Lists every object whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>>;
}
