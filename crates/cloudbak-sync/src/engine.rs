//! Session-bounded transfer engine
//!
//! The [`TransferSession`] drains the work the content store derives from
//! the `locals` and `remotes` tables: pending uploads first, then pending
//! removals, one at a time.
//!
//! ## Session Flow
//!
//! 1. **Failure budget**: stop with `MAX_SESSION_FAILED` once
//!    `max_session_failures` transfers failed
//! 2. **Add**: while under `max_session_size`, upload the next candidate
//! 3. **Remove**: otherwise delete the next tombstoned object the retention
//!    rule allows
//! 4. **Finish**: upload the database itself to `/<db-basename>`
//!
//! ## Failure Handling
//!
//! A failed compress, encrypt, upload or delete puts the path on the
//! session's skip list and counts against the failure budget; it is never
//! retried within the session and its rows are left untouched. Content
//! store errors abort the session.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use cloudbak_core::config::Config;
use cloudbak_core::domain::{
    can_remove, database_key, remote_key_for, EntryType, LocalEntry, RemoteEntry,
    RemovalCandidate, StorageClass,
};
use cloudbak_core::ports::{IArchiver, IContentStore, ICrypter, IObjectStore, UploadRequest};

use crate::filesystem::archive_members;
use crate::{system_clock, Clock};

// ============================================================================
// SessionOutcome / SessionReport
// ============================================================================

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOutcome {
    /// The upload byte budget was reached
    MaxSessionSize,
    /// The failure budget was reached
    MaxSessionFailed,
    /// Nothing left to upload or remove
    NoFilesLeft,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::MaxSessionSize => "MAX_SESSION_SIZE",
            SessionOutcome::MaxSessionFailed => "MAX_SESSION_FAILED",
            SessionOutcome::NoFilesLeft => "NO_FILES_LEFT",
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed transfer session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Entries uploaded
    pub uploaded: u32,
    /// Objects deleted from the bucket
    pub removed: u32,
    /// Removals held back by the retention rule
    pub deferred: u32,
    /// Failed transfers
    pub failed: u32,
    /// Bytes counted against the session budget
    pub uploaded_bytes: u64,
    pub failed_paths: Vec<String>,
    /// Whether the database snapshot reached the bucket
    pub database_uploaded: bool,
    pub duration_ms: u64,
}

// ============================================================================
// SessionSettings
// ============================================================================

/// Limits and switches of a session, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_session_size: u64,
    pub max_session_failures: u32,
    pub random_order: bool,
    /// Record outcomes without any storage, codec or filesystem side effect
    pub dry_run: bool,
    pub prefix_remove: Vec<String>,
    /// Scanner exclusions, re-applied when an archive unit is packed
    pub ignore_patterns: Vec<String>,
    /// Path fragments marking archive unit members
    pub compress_leaves_patterns: Vec<String>,
}

impl SessionSettings {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            max_session_size: config.backup.max_session_size,
            max_session_failures: config.backup.max_session_failures,
            random_order: config.backup.random_order,
            dry_run,
            prefix_remove: config.backup.prefix_remove.clone(),
            ignore_patterns: non_empty(&config.scan.ignore_patterns),
            compress_leaves_patterns: non_empty(&config.scan.compress_leaves_patterns),
        }
    }
}

fn non_empty(patterns: &[String]) -> Vec<String> {
    patterns.iter().filter(|p| !p.is_empty()).cloned().collect()
}

/// Mutable bookkeeping of one `run_session` call
#[derive(Debug, Default)]
struct SessionState {
    uploaded_bytes: u64,
    failures: u32,
    /// Adds and removes performed
    count: u32,
    skip: HashSet<String>,
    uploaded: u32,
    removed: u32,
    deferred: u32,
    failed_paths: Vec<String>,
}

impl SessionState {
    fn record_failure(&mut self, path: &str) {
        self.skip.insert(path.to_string());
        self.failures += 1;
        self.failed_paths.push(path.to_string());
    }
}

// ============================================================================
// TransferSession
// ============================================================================

/// Uploads changed entries and removes deleted ones, within budgets
///
/// ## Dependencies
///
/// - `store`: planner queries and inventory updates
/// - `object_store`: the bucket
/// - `crypter`: payload encryption
/// - `archiver`: bundles archive units before encryption
pub struct TransferSession {
    store: Arc<dyn IContentStore>,
    object_store: Arc<dyn IObjectStore>,
    crypter: Arc<dyn ICrypter>,
    archiver: Arc<dyn IArchiver>,
    settings: SessionSettings,
    clock: Clock,
}

impl TransferSession {
    pub fn new(
        store: Arc<dyn IContentStore>,
        object_store: Arc<dyn IObjectStore>,
        crypter: Arc<dyn ICrypter>,
        archiver: Arc<dyn IArchiver>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            object_store,
            crypter,
            archiver,
            settings,
            clock: system_clock(),
        }
    }

    /// Replaces the time source used for upload timestamps and retention
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Runs the add/remove loop until a budget is exhausted or no work is left
    ///
    /// # Errors
    /// Returns an error only when the content store fails; transfer failures
    /// are counted in the report.
    #[instrument(skip(self))]
    pub async fn run_session(&self) -> Result<SessionReport> {
        let start = std::time::Instant::now();
        let counts = self.store.get_counts().await.context("Failed to count entries")?;
        info!(
            locals = counts.locals,
            remotes = counts.remotes,
            dry_run = self.settings.dry_run,
            "Starting transfer session"
        );

        let mut state = SessionState::default();
        let random = self.settings.random_order;

        let outcome = loop {
            if state.failures >= self.settings.max_session_failures {
                debug!(
                    failures = state.failures,
                    max = self.settings.max_session_failures,
                    "Failure budget exhausted"
                );
                break SessionOutcome::MaxSessionFailed;
            }

            if state.uploaded_bytes < self.settings.max_session_size {
                let next = self
                    .store
                    .get_local_for_backup(&state.skip, random)
                    .await
                    .context("Failed to query next upload")?;
                if let Some(local) = next {
                    self.add(&local, &mut state).await?;
                    continue;
                }
            }

            let next = self
                .store
                .get_local_for_remove(&state.skip, random)
                .await
                .context("Failed to query next removal")?;
            if let Some(candidate) = next {
                self.remove(&candidate, &mut state).await?;
                continue;
            }

            break if state.uploaded_bytes >= self.settings.max_session_size {
                SessionOutcome::MaxSessionSize
            } else {
                SessionOutcome::NoFilesLeft
            };
        };

        let database_uploaded = if state.count > 0 {
            self.finish().await?
        } else {
            false
        };

        let report = SessionReport {
            outcome,
            uploaded: state.uploaded,
            removed: state.removed,
            deferred: state.deferred,
            failed: state.failures,
            uploaded_bytes: state.uploaded_bytes,
            failed_paths: state.failed_paths,
            database_uploaded,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            outcome = %report.outcome,
            uploaded = report.uploaded,
            removed = report.removed,
            deferred = report.deferred,
            failed = report.failed,
            bytes = report.uploaded_bytes,
            "Transfer session finished"
        );
        Ok(report)
    }

    // ========================================================================
    // Add
    // ========================================================================

    async fn add(&self, local: &LocalEntry, state: &mut SessionState) -> Result<()> {
        debug!(path = %local.path, kind = %local.entry_type, "Add");
        state.count += 1;

        if self.settings.dry_run {
            self.store
                .update_remote(&RemoteEntry::uploaded(local, 0, self.now()))
                .await
                .context("Failed to record upload")?;
            state.uploaded_bytes += local.size;
            state.uploaded += 1;
            return Ok(());
        }

        match self.transfer(local).await {
            Ok(size) => {
                self.store
                    .update_remote(&RemoteEntry::uploaded(local, size, self.now()))
                    .await
                    .context("Failed to record upload")?;
                state.uploaded_bytes += size;
                state.uploaded += 1;
                info!(path = %local.path, bytes = size, "Uploaded");
            }
            Err(err) => {
                warn!(path = %local.path, operation = "upload", error = %format!("{err:#}"), "Upload failed");
                state.record_failure(&local.path);
            }
        }
        Ok(())
    }

    /// Archives (if needed), encrypts and uploads one entry
    ///
    /// Returns the encrypted size. Every intermediate file is removed
    /// before this returns.
    async fn transfer(&self, local: &LocalEntry) -> Result<u64> {
        let path = Path::new(&local.path);

        let mut _archive_guard: Option<TempPath> = None;
        let payload: PathBuf = match local.entry_type {
            EntryType::File => path.to_path_buf(),
            EntryType::Archive => {
                let dir = path
                    .parent()
                    .with_context(|| format!("Archive unit without directory: {}", local.path))?;
                let members = archive_members(
                    dir,
                    &self.settings.ignore_patterns,
                    &self.settings.compress_leaves_patterns,
                )
                .await
                .with_context(|| format!("Failed to list {}", dir.display()))?;
                if members.is_empty() {
                    bail!("Archive unit has no members left: {}", dir.display());
                }
                let archive = self
                    .archiver
                    .compress(dir, &members)
                    .await
                    .with_context(|| format!("Failed to archive {}", dir.display()))?;
                let archive = TempPath::from_path(archive);
                let payload = archive.to_path_buf();
                _archive_guard = Some(archive);
                payload
            }
        };

        let encrypted = self
            .crypter
            .encrypt(&payload)
            .await
            .with_context(|| format!("Failed to encrypt {}", payload.display()))?;
        let _encrypted_guard = TempPath::from_path(&encrypted.path);

        let key = remote_key_for(&local.path, &self.settings.prefix_remove);
        let class = StorageClass::for_size(encrypted.size);
        debug!(key = %key, class = %class, size = encrypted.size, "Uploading");

        let request = UploadRequest::new(&encrypted.path, key, encrypted.size, class)
            .with_metadata("type", local.entry_type.as_str());
        self.object_store.upload(&request).await?;
        Ok(encrypted.size)
    }

    // ========================================================================
    // Remove
    // ========================================================================

    async fn remove(&self, candidate: &RemovalCandidate, state: &mut SessionState) -> Result<()> {
        let path = candidate.path.as_str();
        debug!(path, size = candidate.size, "Remove");

        if !can_remove(candidate.size, candidate.timestamp, self.now()) {
            debug!(path, "Skipping removal due to storage class and upload time");
            state.skip.insert(path.to_string());
            state.deferred += 1;
            return Ok(());
        }

        state.count += 1;
        if !self.settings.dry_run {
            let key = remote_key_for(path, &self.settings.prefix_remove);
            if let Err(err) = self.object_store.delete(&key).await {
                warn!(path, key = %key, operation = "remove", error = %format!("{err:#}"), "Removal failed");
                state.record_failure(path);
                return Ok(());
            }
        }

        self.store
            .delete_local(path)
            .await
            .context("Failed to forget removed entry")?;
        self.store
            .delete_remote(path)
            .await
            .context("Failed to forget removed object")?;
        state.removed += 1;
        info!(path, "Removed");
        Ok(())
    }

    // ========================================================================
    // Finish
    // ========================================================================

    /// Uploads the database file as the bucket's snapshot
    ///
    /// The snapshot goes up unencrypted and with a zero size hint, which
    /// keeps it in the `STANDARD` tier since it is replaced often.
    async fn finish(&self) -> Result<bool> {
        if self.settings.dry_run {
            debug!("Dry run, database snapshot not uploaded");
            return Ok(false);
        }
        let Some(db_file) = self.store.database_file() else {
            debug!("In-memory store, no database snapshot");
            return Ok(false);
        };

        self.store
            .checkpoint()
            .await
            .context("Failed to checkpoint database")?;

        let key = database_key(&db_file);
        let request = UploadRequest::new(&db_file, key.clone(), 0, StorageClass::for_size(0));
        match self.object_store.upload(&request).await {
            Ok(()) => {
                info!(key = %key, "Database snapshot uploaded");
                Ok(true)
            }
            Err(err) => {
                warn!(key = %key, error = %format!("{err:#}"), "Database snapshot upload failed");
                Ok(false)
            }
        }
    }
}
