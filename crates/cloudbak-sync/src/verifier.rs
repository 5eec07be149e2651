//! Remote inventory verification
//!
//! Compares the `remotes` table with what the bucket actually holds.
//!
//! - **Orphan**: an object in the bucket that no remote entry accounts for
//! - **Stale record**: a remote entry whose object is missing from the bucket
//!
//! Listed keys have the configured `prefix_remove` entries stripped, so each
//! key is matched against `prefix + key` for the empty prefix first and then
//! every configured prefix, in order. The first match claims the entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cloudbak_core::ports::{IContentStore, IObjectStore};

/// Outcome of one verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Objects listed, the database snapshot excluded
    pub listed: usize,
    /// Keys present in the bucket but unknown to the store
    pub orphans: Vec<String>,
    /// Store paths whose object is missing from the bucket
    pub stale: Vec<String>,
    /// Stale records deleted from the store
    pub repaired: usize,
    /// Stale records that could not be deleted
    pub repair_failures: Vec<String>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphans.is_empty() && self.stale.is_empty()
    }
}

/// Reconciles the store's remote inventory with a bucket listing
pub struct Verifier {
    store: Arc<dyn IContentStore>,
    object_store: Arc<dyn IObjectStore>,
    prefix_remove: Vec<String>,
    /// Key of the database snapshot, which has no remote entry
    database_key: String,
    dry_run: bool,
}

impl Verifier {
    pub fn new(
        store: Arc<dyn IContentStore>,
        object_store: Arc<dyn IObjectStore>,
        prefix_remove: Vec<String>,
        database_key: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            object_store,
            prefix_remove,
            database_key: database_key.into(),
            dry_run,
        }
    }

    /// Lists the bucket, reports discrepancies and drops stale records
    /// (unless dry run)
    #[instrument(skip(self))]
    pub async fn verify(&self) -> Result<VerifyReport> {
        let objects = self
            .object_store
            .list("/")
            .await
            .context("Failed to list bucket")?;
        let snapshot = self.store.get_all().await.context("Failed to read store")?;
        info!(
            objects = objects.len(),
            remotes = snapshot.remotes.len(),
            "Verifying remote inventory"
        );

        let mut remaining: BTreeSet<String> = snapshot.remotes_by_path.keys().cloned().collect();
        let prefixes: Vec<&str> = std::iter::once("")
            .chain(self.prefix_remove.iter().map(String::as_str))
            .collect();

        let mut report = VerifyReport::default();
        for object in objects {
            if object.key == self.database_key {
                continue;
            }
            report.listed += 1;

            let claimed = prefixes
                .iter()
                .map(|prefix| format!("{}{}", prefix, object.key))
                .find(|candidate| remaining.contains(candidate));
            match claimed {
                Some(path) => {
                    remaining.remove(&path);
                }
                None => {
                    debug!(key = %object.key, "Orphaned object");
                    report.orphans.push(object.key);
                }
            }
        }
        report.stale = remaining.into_iter().collect();

        for path in &report.stale {
            debug!(path = %path, "Stale remote record");
        }

        if !self.dry_run {
            for path in &report.stale {
                match self.store.delete_remote(path).await {
                    Ok(()) => report.repaired += 1,
                    Err(err) => {
                        warn!(path = %path, error = %err, "Failed to delete stale record");
                        report.repair_failures.push(path.clone());
                    }
                }
            }
        }

        info!(
            listed = report.listed,
            orphans = report.orphans.len(),
            stale = report.stale.len(),
            repaired = report.repaired,
            "Verification complete"
        );
        Ok(report)
    }
}
