//! Storage tier selection and deletion eligibility
//!
//! Objects of [`IA_MIN_SIZE`] bytes or more are stored in the infrequent
//! access tier, which bills a minimum storage duration. Such objects are
//! only removed once [`IA_MIN_RETENTION_MS`] has passed since upload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Smallest encrypted size stored as `STANDARD_IA`.
pub const IA_MIN_SIZE: u64 = 128 * 1024;

/// Early deletion window of the `STANDARD_IA` tier (31 days).
pub const IA_MIN_RETENTION_MS: i64 = 31 * 24 * 3600 * 1000;

/// Object storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Standard,
    StandardIa,
}

impl StorageClass {
    /// Tier for an object of `size` encrypted bytes
    pub fn for_size(size: u64) -> Self {
        if size >= IA_MIN_SIZE {
            StorageClass::StandardIa
        } else {
            StorageClass::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::StandardIa => "STANDARD_IA",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an object of `size` bytes uploaded at `timestamp` may be deleted
/// at `now` (all times epoch milliseconds)
pub fn can_remove(size: u64, timestamp: i64, now: i64) -> bool {
    match StorageClass::for_size(size) {
        StorageClass::Standard => true,
        StorageClass::StandardIa => now.saturating_sub(timestamp) >= IA_MIN_RETENTION_MS,
    }
}
