//! Restore from the bucket
//!
//! The [`Restorer`] never reads the local inventory: it downloads the
//! database snapshot from the bucket, opens it read-only and restores the
//! `remotes` entries whose key starts with the requested prefix.
//!
//! ## Restore Flow
//!
//! 1. **Snapshot**: download `/<db-basename>` into the temp directory
//! 2. **Select**: keep remote entries whose key starts with the prefix
//! 3. **Confirm**: ask the operator unless `assume_yes`
//! 4. **Per entry**: download, decrypt, expand archive units
//!
//! A failing entry is recorded and the remaining entries are still
//! processed.
//!
//! ## Test Mode
//!
//! Instead of writing under the output directory, every entry is decoded
//! into the temp directory and compared byte for byte with its local
//! original. The original of key `k` is the first existing `p + k` for `p`
//! in `""` followed by the configured `prefix_remove` entries.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cloudbak_cache::{DatabasePool, SqliteContentStore};
use cloudbak_core::domain::{normalize_prefix, remote_key_for, EntryType, RemoteEntry};
use cloudbak_core::ports::{IArchiver, IConfirm, IContentStore, ICrypter, IObjectStore};

use tempfile::TempPath;

use crate::temp::{scratch_path, TempDatabase};
use crate::SyncError;

const COMPARE_CHUNK: usize = 64 * 1024;

/// What to restore and how
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Key prefix; a missing leading `/` is added
    pub prefix: String,
    /// Restored keys are written to `<output><key>`
    pub output: PathBuf,
    /// Compare with local originals instead of writing to `output`
    pub test_mode: bool,
    /// Only list the matching entries
    pub dry_run: bool,
    pub assume_yes: bool,
}

/// Outcome of [`Restorer::restore`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    /// Entries matching the prefix
    pub matched: usize,
    /// Stored size of the matching entries
    pub matched_bytes: u64,
    /// Entries restored, or verified identical in test mode
    pub restored: usize,
    /// Keys that could not be restored
    pub failed: Vec<String>,
    /// Keys whose decoded content differs from the local original
    pub mismatched: Vec<String>,
    /// Keys of the matching entries, filled on dry run
    pub listed: Vec<String>,
    /// The operator declined the confirmation
    pub cancelled: bool,
}

/// Restores backed up entries from the bucket
///
/// ## Dependencies
///
/// - `object_store`: source of the snapshot and of every payload
/// - `crypter`, `archiver`: decode payloads
/// - `confirm`: operator confirmation before writing
pub struct Restorer {
    object_store: Arc<dyn IObjectStore>,
    crypter: Arc<dyn ICrypter>,
    archiver: Arc<dyn IArchiver>,
    confirm: Arc<dyn IConfirm>,
    /// Key of the database snapshot in the bucket
    database_key: String,
    prefix_remove: Vec<String>,
    temp_dir: PathBuf,
}

impl Restorer {
    pub fn new(
        object_store: Arc<dyn IObjectStore>,
        crypter: Arc<dyn ICrypter>,
        archiver: Arc<dyn IArchiver>,
        confirm: Arc<dyn IConfirm>,
        database_key: impl Into<String>,
        prefix_remove: Vec<String>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            object_store,
            crypter,
            archiver,
            confirm,
            database_key: database_key.into(),
            prefix_remove,
            temp_dir: temp_dir.into(),
        }
    }

    /// Restores every entry under `options.prefix`
    ///
    /// # Errors
    /// Fails when the snapshot cannot be fetched or read. Per-entry
    /// failures are collected in the report.
    #[instrument(skip(self, options), fields(prefix = %options.prefix))]
    pub async fn restore(&self, options: &RestoreOptions) -> Result<RestoreReport> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.temp_dir.display()))?;

        let remotes = self.load_snapshot().await?;
        let prefix = normalize_prefix(&options.prefix);
        let entries: Vec<(String, RemoteEntry)> = remotes
            .into_iter()
            .map(|entry| (remote_key_for(&entry.path, &self.prefix_remove), entry))
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();

        let mut report = RestoreReport {
            matched: entries.len(),
            matched_bytes: entries.iter().map(|(_, e)| e.size).sum(),
            ..RestoreReport::default()
        };
        if entries.is_empty() {
            info!(prefix = %prefix, "No files matched");
            return Ok(report);
        }
        info!(
            prefix = %prefix,
            matched = report.matched,
            bytes = report.matched_bytes,
            "Files matched"
        );

        if options.dry_run {
            for (key, entry) in &entries {
                info!(key = %key, kind = %entry.entry_type, size = entry.size, "Would restore");
            }
            report.listed = entries.into_iter().map(|(key, _)| key).collect();
            return Ok(report);
        }

        if !options.assume_yes {
            let question = if options.test_mode {
                format!(
                    "Test restore of {} files ({} bytes) against local originals?",
                    report.matched, report.matched_bytes
                )
            } else {
                format!(
                    "Restore {} files ({} bytes) to {}?",
                    report.matched,
                    report.matched_bytes,
                    options.output.display()
                )
            };
            if !self.confirm.confirm(&question).await? {
                info!("Restore cancelled");
                report.cancelled = true;
                return Ok(report);
            }
        }

        for (index, (key, entry)) in entries.iter().enumerate() {
            debug!(key = %key, done = index, total = entries.len(), "Restoring");
            let result = if options.test_mode {
                self.test_entry(key, entry).await
            } else {
                self.restore_entry(key, entry, &options.output).await
            };
            match result {
                Ok(true) => report.restored += 1,
                Ok(false) => {
                    warn!(key = %key, "Restored content differs from local original");
                    report.mismatched.push(key.clone());
                }
                Err(err) => {
                    warn!(key = %key, error = %format!("{err:#}"), "Failed to restore");
                    report.failed.push(key.clone());
                }
            }
        }

        info!(
            "{} restored, {} failed",
            report.restored,
            report.failed.len() + report.mismatched.len()
        );
        if !report.failed.is_empty() || !report.mismatched.is_empty() {
            let keys: Vec<&str> = report
                .failed
                .iter()
                .chain(report.mismatched.iter())
                .map(String::as_str)
                .collect();
            warn!("Failed to restore:\n{}", keys.join("\n"));
        }
        Ok(report)
    }

    /// Downloads the database snapshot and reads its `remotes` table
    async fn load_snapshot(&self) -> Result<Vec<RemoteEntry>> {
        let snapshot = TempDatabase::new_in(&self.temp_dir)?;
        self.object_store
            .download(&self.database_key, snapshot.path())
            .await
            .with_context(|| format!("Failed to download database snapshot {}", self.database_key))?;

        let pool = DatabasePool::open_read_only(snapshot.path()).await?;
        let store = SqliteContentStore::from_database(&pool);
        let result = store.get_all().await;
        pool.close().await;

        let remotes = result.context("Failed to read database snapshot")?.remotes;
        debug!(remotes = remotes.len(), "Database snapshot loaded");
        Ok(remotes)
    }

    /// Downloads one payload into a scoped temp file
    async fn fetch(&self, key: &str) -> Result<TempPath> {
        let download = scratch_path(&self.temp_dir, ".enc")?;
        self.object_store.download(key, &download).await?;
        Ok(download)
    }

    /// Decodes one entry to `<output><key>`
    async fn restore_entry(&self, key: &str, entry: &RemoteEntry, output: &Path) -> Result<bool> {
        let target = output_path(output, key);
        let download = self.fetch(key).await?;

        match entry.entry_type {
            EntryType::File => {
                self.crypter.decrypt(&download, &target).await?;
            }
            EntryType::Archive => {
                let dir = target
                    .parent()
                    .with_context(|| format!("Archive key without directory: {}", key))?;
                let tar = scratch_path(&self.temp_dir, ".tar")?;
                self.crypter.decrypt(&download, &tar).await?;
                self.archiver.decompress(&tar, dir).await?;
            }
        }
        info!(key = %key, target = %target.display(), "Restored");
        Ok(true)
    }

    /// Decodes one entry into the temp directory and compares it with the
    /// local original
    async fn test_entry(&self, key: &str, entry: &RemoteEntry) -> Result<bool> {
        let original = self.find_original(key, entry.entry_type).await?;
        let download = self.fetch(key).await?;

        let identical = match entry.entry_type {
            EntryType::File => {
                let decoded = scratch_path(&self.temp_dir, ".dec")?;
                self.crypter.decrypt(&download, &decoded).await?;
                files_equal(&decoded, &original).await?
            }
            EntryType::Archive => {
                let source_dir = original
                    .parent()
                    .with_context(|| format!("Archive key without directory: {}", key))?
                    .to_path_buf();
                let tar = scratch_path(&self.temp_dir, ".tar")?;
                self.crypter.decrypt(&download, &tar).await?;
                let scratch = tempfile::Builder::new()
                    .prefix("cloudbak-")
                    .tempdir_in(&self.temp_dir)?;
                self.archiver.decompress(&tar, scratch.path()).await?;
                dirs_equal(scratch.path(), &source_dir).await?
            }
        };
        debug!(key = %key, original = %original.display(), identical, "Compared");
        Ok(identical)
    }

    /// First `prefix + key` that exists on disk
    ///
    /// An archive unit has no file of its own; its directory is looked up
    /// instead.
    async fn find_original(&self, key: &str, kind: EntryType) -> Result<PathBuf> {
        let prefixes = std::iter::once("").chain(self.prefix_remove.iter().map(String::as_str));
        for prefix in prefixes {
            let candidate = PathBuf::from(format!("{}{}", prefix, key));
            let probe = match kind {
                EntryType::File => Some(candidate.as_path()),
                EntryType::Archive => candidate.parent(),
            };
            if let Some(probe) = probe {
                if tokio::fs::metadata(probe).await.is_ok() {
                    return Ok(candidate);
                }
            }
        }
        Err(SyncError::LocalOriginalNotFound(key.to_string()).into())
    }
}

/// `<output><key>` with the key's leading `/` stripped
fn output_path(output: &Path, key: &str) -> PathBuf {
    output.join(key.trim_start_matches('/'))
}

/// Byte-for-byte comparison of two files
async fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let a = a.to_path_buf();
    let b = b.to_path_buf();
    let equal = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
        if std::fs::metadata(&a)?.len() != std::fs::metadata(&b)?.len() {
            return Ok(false);
        }
        let mut left = std::io::BufReader::new(std::fs::File::open(&a)?);
        let mut right = std::io::BufReader::new(std::fs::File::open(&b)?);
        let mut lbuf = vec![0u8; COMPARE_CHUNK];
        let mut rbuf = vec![0u8; COMPARE_CHUNK];
        loop {
            let n = fill(&mut left, &mut lbuf)?;
            let m = fill(&mut right, &mut rbuf)?;
            if n != m || lbuf[..n] != rbuf[..m] {
                return Ok(false);
            }
            if n == 0 {
                return Ok(true);
            }
        }
    })
    .await??;
    Ok(equal)
}

/// Reads until `buf` is full or the reader is exhausted
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Compares every extracted member with the file of the same name in
/// `source`
async fn dirs_equal(extracted: &Path, source: &Path) -> Result<bool> {
    let mut members = tokio::fs::read_dir(extracted)
        .await
        .with_context(|| format!("Failed to read {}", extracted.display()))?;
    let mut count = 0;
    while let Some(member) = members.next_entry().await? {
        count += 1;
        let original = source.join(member.file_name());
        if tokio::fs::metadata(&original).await.is_err() {
            debug!(member = %original.display(), "Archive member missing locally");
            return Ok(false);
        }
        if !files_equal(&member.path(), &original).await? {
            return Ok(false);
        }
    }
    if count == 0 {
        bail!("Archive {} is empty", extracted.display());
    }
    Ok(true)
}
