//! cloudbak storage - Object storage transports
//!
//! Provides [`IObjectStore`] adapters for the backup bucket:
//! - [`AwsCliStore`] drives the `aws` command line tool (`aws s3 cp|rm|ls`)
//! - [`DirectoryStore`] treats a local directory as the bucket
//!
//! ## Modules
//!
//! - [`aws`] - `aws s3` subprocess transport and listing parser
//! - [`directory`] - Local directory transport

pub mod aws;
pub mod directory;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use cloudbak_core::config::StorageConfig;
use cloudbak_core::ports::IObjectStore;

pub use aws::{parse_listing_line, AwsCliStore};
pub use directory::DirectoryStore;

/// Errors that can occur when talking to the backup bucket
#[derive(Debug, Error)]
pub enum StorageError {
    /// The transport binary could not be started
    #[error("Could not find {0}")]
    BinaryNotFound(PathBuf),

    /// The transport command exited unsuccessfully
    #[error("{command} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The key is not a valid bucket key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The payload does not have the size the caller measured
    #[error("Size mismatch for {key}: expected {expected} bytes, found {actual}")]
    SizeMismatch { key: String, expected: u64, actual: u64 },

    /// The storage configuration cannot produce a transport
    #[error("Unsupported storage configuration: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full URL of `key` inside `bucket`
///
/// Keys begin with `/`, so they are appended verbatim.
pub fn storage_url(bucket: &str, key: &str) -> String {
    format!("s3://{}{}", bucket, key)
}

/// Builds the transport selected by `storage.backend`
pub fn object_store_from_config(
    config: &StorageConfig,
) -> Result<Arc<dyn IObjectStore>, StorageError> {
    match config.backend.as_str() {
        "aws" => Ok(Arc::new(AwsCliStore::new(
            config.aws_binary.clone(),
            config.bucket.clone(),
        ))),
        "directory" => {
            let dir = config.directory.clone().ok_or_else(|| {
                StorageError::Unsupported("storage.directory is required".into())
            })?;
            Ok(Arc::new(DirectoryStore::new(dir)))
        }
        other => Err(StorageError::Unsupported(format!(
            "unknown backend '{}'",
            other
        ))),
    }
}
