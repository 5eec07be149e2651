//! Command wiring
//!
//! Loads and validates the configuration, checks preconditions, and builds
//! the adapters every command shares.
//!
//! ## Preconditions
//!
//! Checked before any transfer, each one fatal:
//! - the configuration file exists, parses and validates
//! - every source root is a readable directory (backup and scan)
//! - the `aws` binary answers `--version` (aws backend)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use cloudbak_cache::{DatabasePool, SqliteContentStore};
use cloudbak_codec::{AeadCrypter, TarArchiver};
use cloudbak_core::config::Config;
use cloudbak_core::ports::IObjectStore;
use cloudbak_storage::{object_store_from_config, AwsCliStore};
use cloudbak_sync::TempDatabase;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub format: OutputFormat,
    pub quiet: bool,
    pub dry_run: bool,
    pub config_path: PathBuf,
}

impl GlobalArgs {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Loads the configuration file, applies environment overrides and
    /// validates it
    pub fn load_config(&self) -> Result<Config> {
        load_config(&self.config_path)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!(
            "Configuration file not found at {}. Run 'cloudbak config init' to create one.",
            path.display()
        );
    }
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
    config.apply_env_overrides();

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }
    info!(config_path = %path.display(), "Loaded configuration");
    Ok(config)
}

// ============================================================================
// Preconditions
// ============================================================================

/// Fails unless every source root is a readable directory
pub fn check_sources(config: &Config) -> Result<()> {
    for source in &config.backup.sources {
        let readable = std::fs::metadata(source)
            .map(|m| m.is_dir())
            .unwrap_or(false)
            && std::fs::read_dir(source).is_ok();
        if !readable {
            bail!("Source is not a readable directory: {}", source.display());
        }
    }
    Ok(())
}

/// Fails unless the configured transport is usable
pub async fn check_storage(config: &Config) -> Result<()> {
    if config.storage.backend == "aws" {
        let store = AwsCliStore::new(&config.storage.aws_binary, &config.storage.bucket);
        let version = store.version().await.with_context(|| {
            format!(
                "aws CLI not usable at {}",
                config.storage.aws_binary.display()
            )
        })?;
        debug!(version = %version, "aws CLI found");
    }
    Ok(())
}

// ============================================================================
// Adapters
// ============================================================================

/// An open content store, plus the dry-run copy it may be backed by
pub struct OpenStore {
    pub pool: DatabasePool,
    pub store: Arc<SqliteContentStore>,
    /// Removes the `<db>.dry` copy once the command is done
    _dry_copy: Option<TempDatabase>,
}

impl OpenStore {
    /// Closes the pool; the dry-run copy goes away with `self`
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Path of the database copy a dry run works on
pub fn dry_run_path(database: &Path) -> PathBuf {
    let mut name = database.as_os_str().to_os_string();
    name.push(".dry");
    PathBuf::from(name)
}

/// Opens the configured database; on dry run, a throwaway copy of it
pub async fn open_store(config: &Config, dry_run: bool) -> Result<OpenStore> {
    let database = &config.backup.database;
    let (path, dry_copy) = if dry_run {
        let copy = dry_run_path(database);
        let guard = TempDatabase::adopt(&copy);
        if database.exists() {
            tokio::fs::copy(database, &copy)
                .await
                .with_context(|| format!("Failed to copy database to {}", copy.display()))?;
            let mut wal = database.as_os_str().to_os_string();
            wal.push("-wal");
            let wal = PathBuf::from(wal);
            if wal.exists() {
                let mut copy_wal = copy.as_os_str().to_os_string();
                copy_wal.push("-wal");
                tokio::fs::copy(&wal, PathBuf::from(copy_wal)).await?;
            }
        }
        info!(copy = %copy.display(), "Dry run against a copy of the database");
        (copy, Some(guard))
    } else {
        (database.clone(), None)
    };

    let pool = DatabasePool::new(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    let store = Arc::new(SqliteContentStore::from_database(&pool));
    Ok(OpenStore {
        pool,
        store,
        _dry_copy: dry_copy,
    })
}

pub fn object_store(config: &Config) -> Result<Arc<dyn IObjectStore>> {
    Ok(object_store_from_config(&config.storage)?)
}

/// Creates the temp directory and returns it
pub async fn temp_dir(config: &Config) -> Result<PathBuf> {
    let dir = config.temp_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create temp directory {}", dir.display()))?;
    Ok(dir)
}

pub fn crypter(config: &Config, temp_dir: &Path) -> Result<Arc<AeadCrypter>> {
    let passphrase = config
        .crypto
        .passphrase
        .clone()
        .context("No encryption passphrase configured")?;
    Ok(Arc::new(AeadCrypter::new(passphrase, temp_dir)))
}

pub fn archiver(temp_dir: &Path) -> Arc<TarArchiver> {
    Arc::new(TarArchiver::new(temp_dir))
}
