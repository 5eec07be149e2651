//! Status command - Display inventory status
//!
//! Provides the `cloudbak status` CLI command which shows:
//! 1. Entry counts of the local and remote inventories
//! 2. Pending uploads and removals, and removals held by retention
//! 3. Last and next scan times

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use cloudbak_core::config::Config;
use cloudbak_core::domain::{can_remove, EntryType};
use cloudbak_core::ports::{IContentStore, StoreSnapshot, SETTING_LAST_SCAN};
use cloudbak_sync::now_millis;

use crate::context::{self, GlobalArgs};
use crate::output::{format_bytes, format_timestamp, to_json, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// List every pending path
    #[arg(long)]
    pub pending: bool,
}

/// Figures derived from one store snapshot
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct InventorySummary {
    pub files: usize,
    pub archives: usize,
    pub tombstones: usize,
    pub local_bytes: u64,
    pub remote_objects: usize,
    pub remote_bytes: u64,
    pub pending_uploads: Vec<String>,
    pub pending_upload_bytes: u64,
    pub pending_removals: Vec<String>,
    /// Pending removals the retention rule still blocks
    pub retained: usize,
    pub last_scan: i64,
    pub next_scan: i64,
}

/// Computes what the next session would do with `snapshot` at `now`
pub fn summarize(snapshot: &StoreSnapshot, now: i64, scan_interval_ms: u64) -> InventorySummary {
    let mut summary = InventorySummary::default();

    for local in &snapshot.locals {
        let remote = snapshot.remotes_by_path.get(&local.path);
        if local.is_tombstone() {
            summary.tombstones += 1;
            if let Some(remote) = remote {
                summary.pending_removals.push(local.path.clone());
                if !can_remove(remote.size, remote.timestamp, now) {
                    summary.retained += 1;
                }
            }
            continue;
        }

        match local.entry_type {
            EntryType::File => summary.files += 1,
            EntryType::Archive => summary.archives += 1,
        }
        summary.local_bytes += local.size;
        if remote.map_or(true, |r| r.hash != local.hash) {
            summary.pending_uploads.push(local.path.clone());
            summary.pending_upload_bytes += local.size;
        }
    }

    summary.remote_objects = snapshot.remotes.len();
    summary.remote_bytes = snapshot.remotes.iter().map(|r| r.size).sum();
    summary.last_scan = snapshot
        .settings
        .get(SETTING_LAST_SCAN)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    summary.next_scan = if summary.last_scan == 0 {
        now
    } else {
        summary.last_scan.saturating_add(scan_interval_ms as i64)
    };
    summary
}

impl StatusCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let config = global.load_config()?;

        if !config.backup.database.exists() {
            formatter.error("No database found. Run 'cloudbak backup' first.");
            return Ok(());
        }

        let open = context::open_store(&config, false).await?;
        let snapshot = open.store.get_all().await.context("Failed to read database");
        open.close().await;
        let snapshot = snapshot?;

        info!(database = %config.backup.database.display(), "Showing status");
        let summary = summarize(&snapshot, now_millis(), config.scan.interval_ms);

        if global.is_json() {
            formatter.print_json(&to_json(&summary));
        } else {
            self.print(&config, &summary, formatter.as_ref());
        }
        Ok(())
    }

    fn print(&self, config: &Config, summary: &InventorySummary, formatter: &dyn OutputFormatter) {
        formatter.success(&format!(
            "cloudbak status - {}",
            config.backup.database.display()
        ));
        formatter.info("");
        formatter.info(&format!(
            "Local:      {} files, {} archive units ({})",
            summary.files,
            summary.archives,
            format_bytes(summary.local_bytes)
        ));
        formatter.info(&format!(
            "Remote:     {} objects ({})",
            summary.remote_objects,
            format_bytes(summary.remote_bytes)
        ));
        formatter.info(&format!(
            "To upload:  {} ({})",
            summary.pending_uploads.len(),
            format_bytes(summary.pending_upload_bytes)
        ));
        formatter.info(&format!(
            "To remove:  {} ({} held by minimum storage duration)",
            summary.pending_removals.len(),
            summary.retained
        ));
        formatter.info(&format!("Last scan:  {}", format_timestamp(summary.last_scan)));
        formatter.info(&format!("Next scan:  {}", format_timestamp(summary.next_scan)));

        if self.pending {
            if !summary.pending_uploads.is_empty() {
                formatter.info("");
                formatter.info("Pending uploads:");
                for path in &summary.pending_uploads {
                    formatter.info(&format!("  [upload] {}", path));
                }
            }
            if !summary.pending_removals.is_empty() {
                formatter.info("");
                formatter.info("Pending removals:");
                for path in &summary.pending_removals {
                    formatter.info(&format!("  [remove] {}", path));
                }
            }
        }
    }
}
