//! AwsCliStore - IObjectStore implementation on top of the `aws` CLI
//!
//! Every operation spawns one `aws s3 ...` process and waits for it. Arguments
//! are passed directly to the process (no shell), so paths with quotes,
//! spaces or `$` need no escaping.
//!
//! ## Design Notes
//!
//! - A non-zero exit code is a failure; stderr is carried in the error.
//! - `aws s3 ls` exits with code 1 and prints nothing when the prefix
//!   matches no object; that case is an empty listing.
//! - Listing timestamps are printed in the local time zone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use chrono::{Local, NaiveDateTime, TimeZone};
use tokio::process::Command;
use tracing::{debug, trace};

use cloudbak_core::ports::{IObjectStore, ObjectInfo, UploadRequest};

use crate::{storage_url, StorageError};

/// Transport that shells out to `aws s3`
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    binary: PathBuf,
    bucket: String,
}

impl AwsCliStore {
    pub fn new(binary: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Runs `aws --version`, proving the binary is installed and executable
    pub async fn version(&self) -> Result<String, StorageError> {
        let out = self.run("version", vec!["--version".into()]).await?;
        Ok(out.trim().to_string())
    }

    fn url(&self, key: &str) -> Result<String, StorageError> {
        if !key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(storage_url(&self.bucket, key))
    }

    /// Spawns the binary with `args` and returns its stdout
    async fn run(&self, label: &str, args: Vec<OsString>) -> Result<String, StorageError> {
        trace!(binary = %self.binary.display(), ?args, "Spawning aws");
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StorageError::BinaryNotFound(self.binary.clone())
                }
                _ => StorageError::Io(e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            trace!(command = label, %stdout, "aws finished");
            return Ok(stdout);
        }

        Err(StorageError::CommandFailed {
            command: format!("aws {}", label),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Arguments of the upload command for `request`
    fn upload_args(&self, request: &UploadRequest) -> Result<Vec<OsString>, StorageError> {
        let mut args: Vec<OsString> = vec![
            "s3".into(),
            "cp".into(),
            request.local_path.clone().into_os_string(),
            self.url(&request.key)?.into(),
            "--no-guess-mime-type".into(),
            "--storage-class".into(),
            request.storage_class.as_str().into(),
        ];
        if !request.metadata.is_empty() {
            let pairs: Vec<String> = request
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            args.push("--metadata".into());
            args.push(pairs.join(",").into());
        }
        Ok(args)
    }
}

/// Parses one line of `aws s3 ls --recursive` output
///
/// The format is `YYYY-MM-DD HH:MM:SS <size> <key>`; the key may contain
/// spaces. Returns `None` for anything else (e.g. `PRE` directory lines).
pub fn parse_listing_line(line: &str) -> Option<ObjectInfo> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (stamp, rest) = (line.get(..19)?, line.get(19..)?);
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").ok()?;

    let rest = rest.trim_start();
    let (size, key) = rest.split_once(' ')?;
    let size: u64 = size.parse().ok()?;
    let key = key.trim_start_matches(' ');
    if key.is_empty() {
        return None;
    }

    let timestamp = Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis());

    Some(ObjectInfo {
        key: format!("/{}", key),
        size,
        timestamp,
    })
}

#[async_trait::async_trait]
impl IObjectStore for AwsCliStore {
    async fn upload(&self, request: &UploadRequest) -> anyhow::Result<()> {
        if request.expected_size > 0 {
            let actual = tokio::fs::metadata(&request.local_path)
                .await
                .with_context(|| format!("Failed to stat {}", request.local_path.display()))?
                .len();
            if actual != request.expected_size {
                return Err(StorageError::SizeMismatch {
                    key: request.key.clone(),
                    expected: request.expected_size,
                    actual,
                }
                .into());
            }
        }

        debug!(
            key = %request.key,
            class = %request.storage_class,
            size = request.expected_size,
            "AwsCliStore::upload"
        );
        let args = self.upload_args(request)?;
        self.run("s3 cp", args).await?;
        Ok(())
    }

    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<()> {
        debug!(key, dest = %dest.display(), "AwsCliStore::download");
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let args: Vec<OsString> = vec![
            "s3".into(),
            "cp".into(),
            self.url(key)?.into(),
            dest.as_os_str().to_os_string(),
        ];
        self.run("s3 cp", args).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        debug!(key, "AwsCliStore::delete");
        let args: Vec<OsString> = vec!["s3".into(), "rm".into(), self.url(key)?.into()];
        self.run("s3 rm", args).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
        debug!(prefix, "AwsCliStore::list");
        let args: Vec<OsString> = vec![
            "s3".into(),
            "ls".into(),
            self.url(prefix)?.into(),
            "--recursive".into(),
        ];

        let stdout = match self.run("s3 ls", args).await {
            Ok(stdout) => stdout,
            Err(StorageError::CommandFailed {
                code: Some(1),
                ref stderr,
                ..
            }) if stderr.is_empty() => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_listing_line(line) {
                Some(info) => objects.push(info),
                None => debug!(line, "Ignoring unparseable listing line"),
            }
        }
        debug!(count = objects.len(), "Listing parsed");
        Ok(objects)
    }
}

// ============================================================================
// Tests
// ============================================================================
