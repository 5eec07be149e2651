//! Source scanning
//!
//! The [`Scanner`] brings the `locals` table in line with the source trees.
//!
//! ## Scan Flow
//!
//! 1. **Interval gate**: nothing happens until `scan_interval` has elapsed
//!    since `lastScanTimestamp`
//! 2. **Per source root**: walk, fingerprint, tombstone vanished paths,
//!    upsert observed paths
//! 3. **Unknown sources**: tombstone entries outside every configured root
//! 4. **Pruning**: hard-delete tombstones that were never uploaded
//! 5. **Bookkeeping**: record `lastScanTimestamp`
//!
//! Files under a directory whose path contains a compress-leaves pattern are
//! not tracked one by one: each such directory becomes a single archive
//! unit at `<dir>/<basename(dir)>.tar`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cloudbak_core::config::Config;
use cloudbak_core::domain::{archive_identity, file_identity, LocalEntry};
use cloudbak_core::ports::{IContentStore, IFileWalker, SETTING_LAST_SCAN};

use crate::filesystem::contains_any;

/// Progress is logged every this many files
const PROGRESS_LOG: usize = 1000;

// ============================================================================
// Settings and results
// ============================================================================

/// Scanner configuration, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub sources: Vec<PathBuf>,
    pub compress_leaves_patterns: Vec<String>,
    pub interval_ms: u64,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sources: config.backup.sources.clone(),
            compress_leaves_patterns: config
                .scan
                .compress_leaves_patterns
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            interval_ms: config.scan.interval_ms,
        }
    }
}

/// Counters of one completed scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub sources_scanned: usize,
    /// Roots that were unreadable or empty and left untouched
    pub sources_skipped: usize,
    /// Plain files observed
    pub files: usize,
    /// Archive units observed
    pub archives: usize,
    /// Entries inserted or changed
    pub updated: usize,
    pub tombstoned: usize,
    pub pruned: usize,
}

/// Result of [`Scanner::scan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The previous scan is too recent
    Skipped {
        last_scan: i64,
        next_scan_at: i64,
    },
    Completed(ScanReport),
}

// ============================================================================
// Path helpers
// ============================================================================

/// Root as an inventory prefix: its path with a trailing separator
fn root_prefix(root: &str) -> String {
    if root.ends_with('/') {
        root.to_string()
    } else {
        format!("{}/", root)
    }
}

/// Whether `path` is `root` itself or lies below it
fn is_under_root(path: &str, root: &str) -> bool {
    path == root.trim_end_matches('/') || path.starts_with(&root_prefix(root))
}

/// Synthetic inventory path of the archive unit for `dir`
pub fn archive_unit_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    dir.join(format!("{}.tar", name))
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Identity fingerprint of one file on disk
async fn fingerprint(path: &Path) -> std::io::Result<(String, u64)> {
    let metadata = tokio::fs::metadata(path).await?;
    let path_str = path.to_string_lossy();
    let size = metadata.len();
    Ok((file_identity(&path_str, size, mtime_millis(&metadata)), size))
}

// ============================================================================
// Scanner
// ============================================================================

/// Reconciles the local inventory with the configured source roots
pub struct Scanner {
    store: Arc<dyn IContentStore>,
    walker: Arc<dyn IFileWalker>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn IContentStore>,
        walker: Arc<dyn IFileWalker>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            walker,
            settings,
        }
    }

    fn is_compressed(&self, path: &str) -> bool {
        contains_any(path, &self.settings.compress_leaves_patterns)
    }

    /// Scans unless the previous scan happened less than `interval_ms` ago
    #[instrument(skip(self))]
    pub async fn scan(&self, now: i64) -> Result<ScanOutcome> {
        let last_scan = self
            .store
            .get_setting_i64(SETTING_LAST_SCAN, 0)
            .await
            .context("Failed to read last scan time")?;
        let next_scan_at = last_scan.saturating_add(self.settings.interval_ms as i64);
        if last_scan != 0 && now < next_scan_at {
            debug!(last_scan, next_scan_at, "A scan was performed too recently, skipping");
            return Ok(ScanOutcome::Skipped {
                last_scan,
                next_scan_at,
            });
        }

        Ok(ScanOutcome::Completed(self.scan_now(now).await?))
    }

    /// Scans every source root regardless of the interval
    #[instrument(skip(self))]
    pub async fn scan_now(&self, now: i64) -> Result<ScanReport> {
        info!(sources = self.settings.sources.len(), "Scanning sources for new files");
        let mut report = ScanReport::default();

        for root in &self.settings.sources {
            self.scan_source(root, &mut report).await?;
        }

        report.tombstoned += self.tombstone_unknown_sources().await?;
        report.pruned = self.prune().await?;

        self.store
            .set_setting(SETTING_LAST_SCAN, &now.to_string())
            .await
            .context("Failed to record scan time")?;

        info!(
            files = report.files,
            archives = report.archives,
            updated = report.updated,
            tombstoned = report.tombstoned,
            pruned = report.pruned,
            "Scan complete"
        );
        Ok(report)
    }

    /// Walks one root and applies its listing to the inventory
    async fn scan_source(&self, root: &Path, report: &mut ScanReport) -> Result<()> {
        let root_str = root.to_string_lossy().into_owned();
        info!(source = %root_str, "Scanning source");

        let files = match self.walker.walk(root).await {
            Ok(files) => files,
            Err(err) => {
                warn!(source = %root_str, error = %err, "Source unreadable, leaving its entries untouched");
                report.sources_skipped += 1;
                return Ok(());
            }
        };
        if files.is_empty() {
            warn!(source = %root_str, "No files found, leaving its entries untouched");
            report.sources_skipped += 1;
            return Ok(());
        }
        debug!(source = %root_str, count = files.len(), "Files found");

        let observed = self.fingerprint_all(&files, report).await;

        // Mark vanished entries of this root
        let existing = self
            .store
            .get_locals_with_prefix(&root_prefix(&root_str))
            .await
            .context("Failed to read entries of source")?;
        let mut unchanged: HashSet<&str> = HashSet::new();
        let mut tombstoned = 0;
        for entry in &existing {
            match observed.get(&entry.path) {
                Some(seen) => {
                    if seen == entry {
                        unchanged.insert(entry.path.as_str());
                    }
                }
                None if !entry.is_tombstone() => {
                    self.store
                        .update_local(&entry.tombstoned())
                        .await
                        .context("Failed to tombstone entry")?;
                    tombstoned += 1;
                }
                None => {}
            }
        }
        if tombstoned > 0 {
            debug!(source = %root_str, tombstoned, "Deleted files");
        }
        report.tombstoned += tombstoned;

        // Record new files and changed fingerprints
        for (path, entry) in &observed {
            if unchanged.contains(path.as_str()) {
                continue;
            }
            self.store
                .update_local(entry)
                .await
                .with_context(|| format!("Failed to record {}", path))?;
            report.updated += 1;
        }

        report.sources_scanned += 1;
        Ok(())
    }

    /// Fingerprints plain files and groups compressed leaves into archive units
    async fn fingerprint_all(
        &self,
        files: &[PathBuf],
        report: &mut ScanReport,
    ) -> BTreeMap<String, LocalEntry> {
        let mut observed = BTreeMap::new();
        let mut leaves: BTreeMap<PathBuf, Vec<(String, String, u64)>> = BTreeMap::new();

        for (index, file) in files.iter().enumerate() {
            if index % PROGRESS_LOG == PROGRESS_LOG - 1 {
                debug!(done = index + 1, total = files.len(), "Scanning files");
            }
            let path = file.to_string_lossy().into_owned();
            let (hash, size) = match fingerprint(file).await {
                Ok(found) => found,
                Err(err) => {
                    debug!(path = %path, error = %err, "File vanished during scan");
                    continue;
                }
            };

            if self.is_compressed(&path) {
                if let Some(dir) = file.parent() {
                    leaves
                        .entry(dir.to_path_buf())
                        .or_default()
                        .push((path, hash, size));
                    continue;
                }
            }
            report.files += 1;
            observed.insert(path.clone(), LocalEntry::file(path, hash, size));
        }

        for (dir, mut members) in leaves {
            members.sort_by(|a, b| a.0.cmp(&b.0));
            let hash = archive_identity(members.iter().map(|m| m.1.as_str()));
            let size = members.iter().map(|m| m.2).sum();
            let unit = archive_unit_path(&dir).to_string_lossy().into_owned();
            debug!(unit = %unit, members = members.len(), "Archive unit");
            report.archives += 1;
            observed.insert(unit.clone(), LocalEntry::archive(unit, hash, size));
        }

        observed
    }

    /// Tombstones entries lying outside every configured source
    async fn tombstone_unknown_sources(&self) -> Result<usize> {
        let roots: Vec<String> = self
            .settings
            .sources
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();

        let mut tombstoned = 0;
        for entry in self.store.get_all_locals().await? {
            if entry.is_tombstone() || roots.iter().any(|r| is_under_root(&entry.path, r)) {
                continue;
            }
            self.store.update_local(&entry.tombstoned()).await?;
            tombstoned += 1;
        }
        if tombstoned > 0 {
            debug!(tombstoned, "Deleting files from unknown sources");
        }
        Ok(tombstoned)
    }

    /// Drops tombstones that never reached the bucket
    async fn prune(&self) -> Result<usize> {
        let paths = self.store.get_locals_for_pruning().await?;
        for path in &paths {
            self.store.delete_local(path).await?;
        }
        if !paths.is_empty() {
            debug!(pruned = paths.len(), "Pruned never uploaded tombstones");
        }
        Ok(paths.len())
    }
}
