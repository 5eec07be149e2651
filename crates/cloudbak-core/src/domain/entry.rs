//! Inventory records
//!
//! [`LocalEntry`] is one tracked local path (a file or a synthetic archive
//! unit) and [`RemoteEntry`] is one object known to exist in the bucket.
//! Both share the same key space: the absolute local path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;

/// Hash value marking a tombstoned [`LocalEntry`].
pub const DELETED: &str = "DELETED";

// ============================================================================
// EntryType
// ============================================================================

/// Kind of transfer unit behind an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// A single regular file, transferred as-is
    File,
    /// A directory's leaf files bundled into one tar archive
    Archive,
}

impl EntryType {
    /// Representation stored in the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Archive => "archive",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(EntryType::File),
            "archive" => Ok(EntryType::Archive),
            other => Err(DomainError::InvalidEntryType(other.to_string())),
        }
    }
}

// ============================================================================
// LocalEntry
// ============================================================================

/// A locally observed file or archive unit and its content identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub path: String,
    /// Identity fingerprint, or [`DELETED`] for a tombstone
    pub hash: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Plaintext size in bytes (sum of members for archives)
    pub size: u64,
}

impl LocalEntry {
    pub fn file(path: impl Into<String>, hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            entry_type: EntryType::File,
            size,
        }
    }

    pub fn archive(path: impl Into<String>, hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            entry_type: EntryType::Archive,
            size,
        }
    }

    /// Returns true when the local source no longer has this path
    pub fn is_tombstone(&self) -> bool {
        self.hash == DELETED
    }

    /// Returns a copy of this entry marked as deleted, keeping type and size
    pub fn tombstoned(&self) -> Self {
        Self {
            hash: DELETED.to_string(),
            ..self.clone()
        }
    }
}

// ============================================================================
// RemoteEntry
// ============================================================================

/// An object whose upload completed successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    /// The [`LocalEntry::hash`] at upload time
    pub hash: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Encrypted payload size in bytes
    pub size: u64,
    /// Upload completion time, epoch milliseconds
    pub timestamp: i64,
}

impl RemoteEntry {
    /// Builds the record written after `local` was uploaded as `size` bytes
    pub fn uploaded(local: &LocalEntry, size: u64, timestamp: i64) -> Self {
        Self {
            path: local.path.clone(),
            hash: local.hash.clone(),
            entry_type: local.entry_type,
            size,
            timestamp,
        }
    }
}

/// A tombstoned local path that still has an object in the bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalCandidate {
    pub path: String,
    /// Remote (encrypted) size, drives the retention decision
    pub size: u64,
    /// Remote upload time, epoch milliseconds
    pub timestamp: i64,
}

// ============================================================================
// Identity hashing
// ============================================================================

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Content identity of a plain file: digest of `"<path> <size> <mtime_ms>"`
pub fn file_identity(path: &str, size: u64, mtime_ms: i64) -> String {
    sha256_hex(format!("{} {} {}", path, size, mtime_ms).as_bytes())
}

/// Content identity of an archive unit: digest of the member identities
/// concatenated in the given order
pub fn archive_identity<'a, I>(member_hashes: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for hash in member_hashes {
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}
