//! cloudbak sync - Backup engine
//!
//! Provides:
//! - Source scanning into the local inventory
//! - Session-bounded transfer of pending uploads and removals
//! - Restore from the database snapshot stored in the bucket
//! - Verification of the remote inventory against a bucket listing
//!
//! ## Modules
//!
//! - [`engine`] - `TransferSession`, the add/remove decision loop
//! - [`filesystem`] - `WalkDirScanner`, the source tree walker
//! - [`scanner`] - `Scanner`, reconciles source trees with `locals`
//! - [`restorer`] - `Restorer`, downloads and decodes backed up entries
//! - [`verifier`] - `Verifier`, finds orphans and stale records
//! - [`temp`] - scratch files and `TempDatabase`, a SQLite file dropped with its journals

pub mod engine;
pub mod filesystem;
pub mod restorer;
pub mod scanner;
pub mod temp;
pub mod verifier;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use engine::{SessionOutcome, SessionReport, SessionSettings, TransferSession};
pub use filesystem::WalkDirScanner;
pub use restorer::{RestoreOptions, RestoreReport, Restorer};
pub use scanner::{ScanOutcome, ScanReport, ScanSettings, Scanner};
pub use temp::TempDatabase;
pub use verifier::{VerifyReport, Verifier};

/// Errors that can occur during backup operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A source root cannot be listed
    #[error("Source unreadable: {0}")]
    SourceUnreadable(PathBuf),

    /// No candidate location holds the original of a backed up path
    #[error("Could not find any prefix for a local file: {0}")]
    LocalOriginalNotFound(String),

    /// A domain-level error propagated from cloudbak-core
    #[error("Domain error: {0}")]
    DomainError(#[from] cloudbak_core::domain::DomainError),
}

/// Source of the current time, epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall-clock time, epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The [`Clock`] reading the system time
pub fn system_clock() -> Clock {
    Arc::new(now_millis)
}
