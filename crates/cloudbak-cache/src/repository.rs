//! SQLite implementation of IContentStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! content store port defined in cloudbak-core. It handles row mapping and
//! the SQL behind the two planner queries.
//!
//! ## Type Mapping
//!
//! | Domain Type  | SQL Type | Strategy                                      |
//! |--------------|----------|-----------------------------------------------|
//! | path, hash   | TEXT     | Stored verbatim                               |
//! | EntryType    | TEXT     | `"file"` / `"archive"` via `as_str` / `FromStr` |
//! | size (u64)   | INTEGER  | `i64`, negative values rejected on read       |
//! | timestamp    | INTEGER  | Epoch milliseconds                            |
//! | skip set     | TEXT     | JSON array expanded with `json_each`          |

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cloudbak_core::domain::{EntryType, LocalEntry, RemoteEntry, RemovalCandidate, DELETED};
use cloudbak_core::ports::{IContentStore, StoreCounts, StoreSnapshot};

use crate::{CacheError, DatabasePool};

/// SQLite-based implementation of the content store port
///
/// All operations are performed through a connection pool; each statement
/// runs in its own implicit transaction, so a write is committed when the
/// call returns.
pub struct SqliteContentStore {
    pool: SqlitePool,
    file: Option<PathBuf>,
}

impl SqliteContentStore {
    /// Creates a store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, file: None }
    }

    /// Creates a store that remembers the backing file of `pool`
    pub fn from_database(pool: &DatabasePool) -> Self {
        Self {
            pool: pool.pool().clone(),
            file: pool.path().map(|p| p.to_path_buf()),
        }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn size_from_column(value: i64, field: &str) -> Result<u64, CacheError> {
    u64::try_from(value).map_err(|_| {
        CacheError::SerializationError(format!("Negative {} in database: {}", field, value))
    })
}

fn size_to_column(value: u64) -> Result<i64, CacheError> {
    i64::try_from(value)
        .map_err(|_| CacheError::SerializationError(format!("Size too large to store: {}", value)))
}

fn entry_type_from_column(value: &str) -> Result<EntryType, CacheError> {
    value
        .parse::<EntryType>()
        .map_err(|e| CacheError::SerializationError(e.to_string()))
}

/// Encode the skip set as a JSON array bound to a single parameter
fn skip_to_json(skip: &HashSet<String>) -> Result<String, CacheError> {
    serde_json::to_string(skip).map_err(|e| CacheError::SerializationError(e.to_string()))
}

fn order_clause(random: bool) -> &'static str {
    if random {
        "RANDOM()"
    } else {
        "l.path"
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn local_from_row(row: &SqliteRow) -> Result<LocalEntry, CacheError> {
    let type_str: String = row.try_get("type")?;
    let size: i64 = row.try_get("size")?;
    Ok(LocalEntry {
        path: row.try_get("path")?,
        hash: row.try_get("hash")?,
        entry_type: entry_type_from_column(&type_str)?,
        size: size_from_column(size, "size")?,
    })
}

fn remote_from_row(row: &SqliteRow) -> Result<RemoteEntry, CacheError> {
    let type_str: String = row.try_get("type")?;
    let size: i64 = row.try_get("size")?;
    Ok(RemoteEntry {
        path: row.try_get("path")?,
        hash: row.try_get("hash")?,
        entry_type: entry_type_from_column(&type_str)?,
        size: size_from_column(size, "size")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn candidate_from_row(row: &SqliteRow) -> Result<RemovalCandidate, CacheError> {
    let size: i64 = row.try_get("size")?;
    Ok(RemovalCandidate {
        path: row.try_get("path")?,
        size: size_from_column(size, "size")?,
        timestamp: row.try_get("timestamp")?,
    })
}

// ============================================================================
// IContentStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IContentStore for SqliteContentStore {
    // --- Planner queries ---

    async fn get_local_for_backup(
        &self,
        skip: &HashSet<String>,
        random: bool,
    ) -> anyhow::Result<Option<LocalEntry>> {
        let sql = format!(
            "SELECT l.path, l.hash, l.type, l.size FROM locals l \
             LEFT JOIN remotes r ON r.path = l.path \
             WHERE l.hash != ? \
               AND (r.path IS NULL OR r.hash != l.hash) \
               AND l.path NOT IN (SELECT value FROM json_each(?)) \
             ORDER BY {} LIMIT 1",
            order_clause(random)
        );
        let row = sqlx::query(&sql)
            .bind(DELETED)
            .bind(skip_to_json(skip)?)
            .fetch_optional(&self.pool)
            .await?;

        let entry = row.as_ref().map(local_from_row).transpose()?;
        tracing::trace!(
            skip = skip.len(),
            found = entry.as_ref().map(|e| e.path.as_str()),
            "get_local_for_backup"
        );
        Ok(entry)
    }

    async fn get_local_for_remove(
        &self,
        skip: &HashSet<String>,
        random: bool,
    ) -> anyhow::Result<Option<RemovalCandidate>> {
        let sql = format!(
            "SELECT l.path, r.size, r.timestamp FROM locals l \
             INNER JOIN remotes r ON r.path = l.path \
             WHERE l.hash = ? \
               AND l.path NOT IN (SELECT value FROM json_each(?)) \
             ORDER BY {} LIMIT 1",
            order_clause(random)
        );
        let row = sqlx::query(&sql)
            .bind(DELETED)
            .bind(skip_to_json(skip)?)
            .fetch_optional(&self.pool)
            .await?;

        let candidate = row.as_ref().map(candidate_from_row).transpose()?;
        tracing::trace!(
            skip = skip.len(),
            found = candidate.as_ref().map(|c| c.path.as_str()),
            "get_local_for_remove"
        );
        Ok(candidate)
    }

    // --- Inventory writes ---

    async fn update_local(&self, entry: &LocalEntry) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO locals (path, hash, type, size) VALUES (?, ?, ?, ?)")
            .bind(&entry.path)
            .bind(&entry.hash)
            .bind(entry.entry_type.as_str())
            .bind(size_to_column(entry.size)?)
            .execute(&self.pool)
            .await?;

        tracing::trace!(path = %entry.path, hash = %entry.hash, "Local entry saved");
        Ok(())
    }

    async fn delete_local(&self, path: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM locals WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        tracing::trace!(path = %path, "Local entry deleted");
        Ok(())
    }

    async fn update_remote(&self, entry: &RemoteEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO remotes (path, hash, type, size, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.path)
        .bind(&entry.hash)
        .bind(entry.entry_type.as_str())
        .bind(size_to_column(entry.size)?)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::trace!(path = %entry.path, size = entry.size, "Remote entry saved");
        Ok(())
    }

    async fn delete_remote(&self, path: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM remotes WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        tracing::trace!(path = %path, "Remote entry deleted");
        Ok(())
    }

    // --- Inventory reads ---

    async fn get_counts(&self) -> anyhow::Result<StoreCounts> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM locals) AS locals, \
                    (SELECT COUNT(*) FROM remotes) AS remotes",
        )
        .fetch_one(&self.pool)
        .await?;

        let locals: i64 = row.try_get("locals")?;
        let remotes: i64 = row.try_get("remotes")?;
        Ok(StoreCounts {
            locals: size_from_column(locals, "count")?,
            remotes: size_from_column(remotes, "count")?,
        })
    }

    async fn get_all(&self) -> anyhow::Result<StoreSnapshot> {
        let settings: BTreeMap<String, String> =
            sqlx::query("SELECT name, value FROM settings ORDER BY name")
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| {
                    let name: String = row.try_get("name")?;
                    let value: Option<String> = row.try_get("value")?;
                    Ok((name, value.unwrap_or_default()))
                })
                .collect::<Result<_, sqlx::Error>>()?;

        let locals = self.get_all_locals().await?;

        let remotes = sqlx::query(
            "SELECT path, hash, type, size, timestamp FROM remotes ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(remote_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreSnapshot::new(settings, locals, remotes))
    }

    async fn get_locals_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<LocalEntry>> {
        let rows = sqlx::query(
            "SELECT path, hash, type, size FROM locals \
             WHERE substr(path, 1, length(?1)) = ?1 ORDER BY path",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(local_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_all_locals(&self) -> anyhow::Result<Vec<LocalEntry>> {
        let rows = sqlx::query("SELECT path, hash, type, size FROM locals ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(local_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_locals_for_pruning(&self) -> anyhow::Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT l.path FROM locals l \
             LEFT JOIN remotes r ON r.path = l.path \
             WHERE l.hash = ? AND r.path IS NULL ORDER BY l.path",
        )
        .bind(DELETED)
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    // --- Settings ---

    async fn get_setting(&self, name: &str) -> anyhow::Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM settings WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    async fn set_setting(&self, name: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (name, value) VALUES (?, ?)")
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;

        tracing::trace!(name = %name, value = %value, "Setting saved");
        Ok(())
    }

    // --- Persistence ---

    async fn checkpoint(&self) -> anyhow::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        tracing::debug!("Database checkpoint completed");
        Ok(())
    }

    fn database_file(&self) -> Option<PathBuf> {
        self.file.clone()
    }
}
