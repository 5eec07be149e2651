//! Content store port (driven/secondary port)
//!
//! This module defines the interface for the local and remote inventories
//! and the scalar settings table, together with the two planner queries
//! the transfer session consumes.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - Planner queries are evaluated fresh on every call; the transfer
//!   session interleaves them with writes.
//! - Every write is durable when the future resolves.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::domain::{LocalEntry, RemoteEntry, RemovalCandidate};

/// Setting holding the epoch millisecond time of the last completed scan
pub const SETTING_LAST_SCAN: &str = "lastScanTimestamp";

/// Setting holding the schema version, seeded on first creation
pub const SETTING_VERSION: &str = "version";

// ============================================================================
// Snapshot types
// ============================================================================

/// Row counts of both inventories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub locals: u64,
    pub remotes: u64,
}

/// Full copy of all three tables with path-indexed lookups
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub settings: BTreeMap<String, String>,
    /// Ordered by path
    pub locals: Vec<LocalEntry>,
    /// Ordered by path
    pub remotes: Vec<RemoteEntry>,
    pub locals_by_path: HashMap<String, LocalEntry>,
    pub remotes_by_path: HashMap<String, RemoteEntry>,
}

impl StoreSnapshot {
    /// Builds a snapshot and its path maps from the table contents
    pub fn new(
        settings: BTreeMap<String, String>,
        locals: Vec<LocalEntry>,
        remotes: Vec<RemoteEntry>,
    ) -> Self {
        let locals_by_path = locals
            .iter()
            .map(|l| (l.path.clone(), l.clone()))
            .collect();
        let remotes_by_path = remotes
            .iter()
            .map(|r| (r.path.clone(), r.clone()))
            .collect();
        Self {
            settings,
            locals,
            remotes,
            locals_by_path,
            remotes_by_path,
        }
    }
}

// ============================================================================
// IContentStore trait
// ============================================================================

/// Port trait for the inventory database
#[async_trait::async_trait]
pub trait IContentStore: Send + Sync {
    // --- Planner queries ---

    /// Next entry needing upload: not tombstoned, not in `skip`, and either
    /// never uploaded or uploaded with a different hash.
    ///
    /// Ordered by path, or a uniform random pick when `random` is set.
    async fn get_local_for_backup(
        &self,
        skip: &HashSet<String>,
        random: bool,
    ) -> anyhow::Result<Option<LocalEntry>>;

    /// Next tombstoned entry that still has a remote object, excluding `skip`
    async fn get_local_for_remove(
        &self,
        skip: &HashSet<String>,
        random: bool,
    ) -> anyhow::Result<Option<RemovalCandidate>>;

    // --- Inventory writes ---

    /// Inserts or replaces a local entry by path
    async fn update_local(&self, entry: &LocalEntry) -> anyhow::Result<()>;

    /// Deletes a local entry; missing rows are not an error
    async fn delete_local(&self, path: &str) -> anyhow::Result<()>;

    /// Inserts or replaces a remote entry by path
    async fn update_remote(&self, entry: &RemoteEntry) -> anyhow::Result<()>;

    /// Deletes a remote entry; missing rows are not an error
    async fn delete_remote(&self, path: &str) -> anyhow::Result<()>;

    // --- Inventory reads ---

    async fn get_counts(&self) -> anyhow::Result<StoreCounts>;

    async fn get_all(&self) -> anyhow::Result<StoreSnapshot>;

    /// Local entries whose path starts with `prefix`, ordered by path
    async fn get_locals_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<LocalEntry>>;

    /// Every local entry, ordered by path
    async fn get_all_locals(&self) -> anyhow::Result<Vec<LocalEntry>>;

    /// Paths of tombstones that were never uploaded
    async fn get_locals_for_pruning(&self) -> anyhow::Result<Vec<String>>;

    // --- Settings ---

    async fn get_setting(&self, name: &str) -> anyhow::Result<Option<String>>;

    async fn set_setting(&self, name: &str, value: &str) -> anyhow::Result<()>;

    /// Reads an integer setting, returning `default` when it is absent
    async fn get_setting_i64(&self, name: &str, default: i64) -> anyhow::Result<i64> {
        match self.get_setting(name).await? {
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
                anyhow::anyhow!("setting '{}' is not an integer: {}", name, raw)
            }),
            None => Ok(default),
        }
    }

    // --- Persistence ---

    /// Flushes pending journal pages into the main database file
    async fn checkpoint(&self) -> anyhow::Result<()>;

    /// Path of the backing database file, `None` for in-memory stores
    fn database_file(&self) -> Option<PathBuf>;
}
