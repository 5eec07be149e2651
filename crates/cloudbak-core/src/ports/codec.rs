//! Payload codec ports (driven/secondary ports)
//!
//! Encryption and archival both materialize their output as temporary
//! files. The caller owns every returned path and must remove it.

use std::path::{Path, PathBuf};

/// A temporary encrypted copy of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub path: PathBuf,
    /// Size of the encrypted file in bytes
    pub size: u64,
}

/// Symmetric, passphrase-based file encryption
///
/// A wrong passphrase or corrupted input must fail explicitly; decryption
/// never yields unauthenticated plaintext.
#[async_trait::async_trait]
pub trait ICrypter: Send + Sync {
    /// Encrypts `path` into a new temporary file
    async fn encrypt(&self, path: &Path) -> anyhow::Result<EncryptedFile>;

    /// Decrypts `input` into `output`, creating parent directories
    async fn decrypt(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
}

/// Bundles a directory into a single file and back
#[async_trait::async_trait]
pub trait IArchiver: Send + Sync {
    /// Archives `members`, regular files directly inside `dir`, into a new
    /// temporary file. Members are stored under their file names; any other
    /// file of `dir` stays out. Identical input yields identical bytes.
    async fn compress(&self, dir: &Path, members: &[PathBuf]) -> anyhow::Result<PathBuf>;

    /// Expands `archive` into `dir`, creating it when missing
    async fn decompress(&self, archive: &Path, dir: &Path) -> anyhow::Result<()>;
}
