//! Configuration module for cloudbak.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `crypto.passphrase`.
pub const PASSPHRASE_ENV: &str = "BACKUP_PASSPHRASE";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for cloudbak.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub scan: ScanConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
}

/// Where backed-up objects are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Transport: `aws` (S3 through the aws CLI) or `directory`.
    pub backend: String,
    /// Bucket name; must exist before the first backup.
    pub bucket: String,
    /// Path to the `aws` binary.
    pub aws_binary: PathBuf,
    /// Root directory acting as the bucket for the `directory` backend.
    pub directory: Option<PathBuf>,
}

/// Transfer session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Absolute source roots to back up.
    pub sources: Vec<PathBuf>,
    /// SQLite database holding the inventories.
    pub database: PathBuf,
    /// Directory for encrypted payloads and archives; system temp when unset.
    pub temp_dir: Option<PathBuf>,
    /// Substrings removed (first occurrence, in order) from local paths to
    /// build bucket keys.
    pub prefix_remove: Vec<String>,
    /// A session stops adding files once this many bytes were uploaded.
    pub max_session_size: u64,
    /// A session stops after this many failed transfers.
    pub max_session_failures: u32,
    /// Pick candidates at random instead of in path order.
    pub random_order: bool,
}

/// Source scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Minimum milliseconds between two scans.
    pub interval_ms: u64,
    /// Paths containing any of these substrings are never backed up.
    pub ignore_patterns: Vec<String>,
    /// Files whose path contains any of these substrings are bundled per
    /// directory into one archive.
    pub compress_leaves_patterns: Vec<String>,
}

/// Payload encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Encryption passphrase. [`PASSPHRASE_ENV`] takes precedence.
    pub passphrase: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
    /// Prefix text log lines with a timestamp.
    pub timestamps: bool,
}

/// Operator notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Slack incoming webhook URL; notifications are off when unset.
    pub slack_hook: Option<String>,
    /// Name shown as the message author.
    pub username: Option<String>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudbak/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudbak")
            .join("config.yaml")
    }

    /// Replaces the passphrase with the value of [`PASSPHRASE_ENV`] when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
            if !value.is_empty() {
                self.crypto.passphrase = Some(value);
            }
        }
    }

    /// Directory for temporary payloads.
    pub fn temp_dir(&self) -> PathBuf {
        self.backup
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Source roots as strings, the form used for path prefix matching.
    pub fn source_strings(&self) -> Vec<String> {
        self.backup
            .sources
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default maximum bytes uploaded per session (50 MiB).
pub const DEFAULT_MAX_SESSION_SIZE: u64 = 50 * 1024 * 1024;

/// Default failure budget per session.
pub const DEFAULT_MAX_SESSION_FAILURES: u32 = 10;

/// Default minimum time between scans (7 days).
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 7 * 24 * 3600 * 1000;

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "aws".to_string(),
            bucket: String::new(),
            aws_binary: PathBuf::from("/usr/bin/aws"),
            directory: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("cloudbak");
        Self {
            sources: Vec::new(),
            database: data_dir.join("db.sqlite"),
            temp_dir: None,
            prefix_remove: Vec::new(),
            max_session_size: DEFAULT_MAX_SESSION_SIZE,
            max_session_failures: DEFAULT_MAX_SESSION_FAILURES,
            random_order: false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            ignore_patterns: [
                "/Thumbs.db",
                "/.DS_Store",
                "/.@__thumb/",
                "/@Recycle/",
                "/.git/",
                "/.svn/",
                "/node_modules/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            compress_leaves_patterns: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            timestamps: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"backup.sources"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Valid values for `storage.backend`.
const VALID_BACKENDS: &[&str] = &["aws", "directory"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Only static checks
    /// are made here; source readability is checked before a backup starts.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- storage ---
        if !VALID_BACKENDS.contains(&self.storage.backend.as_str()) {
            errors.push(ValidationError {
                field: "storage.backend".into(),
                message: format!(
                    "invalid backend '{}'; valid options: {}",
                    self.storage.backend,
                    VALID_BACKENDS.join(", ")
                ),
            });
        }
        if self.storage.backend == "aws" {
            if self.storage.bucket.trim().is_empty() {
                errors.push(ValidationError {
                    field: "storage.bucket".into(),
                    message: "must be set".into(),
                });
            } else if self.storage.bucket.contains('/') {
                errors.push(ValidationError {
                    field: "storage.bucket".into(),
                    message: "must be a bare bucket name without '/'".into(),
                });
            }
            if self.storage.aws_binary.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: "storage.aws_binary".into(),
                    message: "must be set".into(),
                });
            }
        }
        if self.storage.backend == "directory" && self.storage.directory.is_none() {
            errors.push(ValidationError {
                field: "storage.directory".into(),
                message: "must be set for the directory backend".into(),
            });
        }

        // --- backup ---
        if self.backup.sources.is_empty() {
            errors.push(ValidationError {
                field: "backup.sources".into(),
                message: "at least one source is required".into(),
            });
        }
        for source in &self.backup.sources {
            if !source.is_absolute() {
                errors.push(ValidationError {
                    field: "backup.sources".into(),
                    message: format!("source must be an absolute path: {}", source.display()),
                });
            }
        }
        if self.backup.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "backup.database".into(),
                message: "must be set".into(),
            });
        }
        for prefix in &self.backup.prefix_remove {
            if prefix.is_empty() {
                errors.push(ValidationError {
                    field: "backup.prefix_remove".into(),
                    message: "prefixes must not be empty".into(),
                });
            } else if prefix.ends_with('/') {
                errors.push(ValidationError {
                    field: "backup.prefix_remove".into(),
                    message: format!("prefix must not end with '/': {}", prefix),
                });
            }
        }
        if self.backup.max_session_size == 0 {
            errors.push(ValidationError {
                field: "backup.max_session_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.backup.max_session_failures == 0 {
            errors.push(ValidationError {
                field: "backup.max_session_failures".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- scan ---
        if self.scan.interval_ms == 0 {
            errors.push(ValidationError {
                field: "scan.interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.scan.ignore_patterns.iter().any(|p| p.is_empty()) {
            errors.push(ValidationError {
                field: "scan.ignore_patterns".into(),
                message: "patterns must not be empty".into(),
            });
        }
        if self.scan.compress_leaves_patterns.iter().any(|p| p.is_empty()) {
            errors.push(ValidationError {
                field: "scan.compress_leaves_patterns".into(),
                message: "patterns must not be empty".into(),
            });
        }

        // --- crypto ---
        match &self.crypto.passphrase {
            Some(p) if !p.is_empty() => {}
            _ => errors.push(ValidationError {
                field: "crypto.passphrase".into(),
                message: format!("must be set (or provide {})", PASSPHRASE_ENV),
            }),
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- notify ---
        if let Some(hook) = &self.notify.slack_hook {
            if !hook.starts_with("https://") {
                errors.push(ValidationError {
                    field: "notify.slack_hook".into(),
                    message: "must be an https:// URL".into(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use cloudbak_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .bucket("my-backups")
///     .source(PathBuf::from("/home/user"))
///     .passphrase("correct horse")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- storage ---

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.config.storage.backend = backend.into();
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.storage.bucket = bucket.into();
        self
    }

    pub fn aws_binary(mut self, path: PathBuf) -> Self {
        self.config.storage.aws_binary = path;
        self
    }

    pub fn storage_directory(mut self, dir: PathBuf) -> Self {
        self.config.storage.directory = Some(dir);
        self
    }

    // --- backup ---

    pub fn source(mut self, source: PathBuf) -> Self {
        self.config.backup.sources.push(source);
        self
    }

    pub fn database(mut self, path: PathBuf) -> Self {
        self.config.backup.database = path;
        self
    }

    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.config.backup.temp_dir = Some(dir);
        self
    }

    pub fn prefix_remove(mut self, prefix: impl Into<String>) -> Self {
        self.config.backup.prefix_remove.push(prefix.into());
        self
    }

    pub fn max_session_size(mut self, bytes: u64) -> Self {
        self.config.backup.max_session_size = bytes;
        self
    }

    pub fn max_session_failures(mut self, n: u32) -> Self {
        self.config.backup.max_session_failures = n;
        self
    }

    pub fn random_order(mut self, random: bool) -> Self {
        self.config.backup.random_order = random;
        self
    }

    // --- scan ---

    pub fn scan_interval_ms(mut self, ms: u64) -> Self {
        self.config.scan.interval_ms = ms;
        self
    }

    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.scan.ignore_patterns = patterns;
        self
    }

    pub fn compress_leaves_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.scan.compress_leaves_patterns.push(pattern.into());
        self
    }

    // --- crypto ---

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.config.crypto.passphrase = Some(passphrase.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- notify ---

    pub fn slack_hook(mut self, url: impl Into<String>) -> Self {
        self.config.notify.slack_hook = Some(url.into());
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
