//! cloudbak codec - What goes over the wire
//!
//! File payloads are encrypted before upload and decrypted on restore.
//! Leaf directories matching a compress pattern are bundled into one tar
//! archive first.
//!
//! ## Key Components
//!
//! - [`AeadCrypter`] - `ICrypter` with Argon2id + AES-256-GCM
//! - [`TarArchiver`] - `IArchiver` producing deterministic tar files
//! - [`CodecError`] - Error types for codec operations

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

pub mod archiver;
pub mod crypter;

pub use archiver::TarArchiver;
pub use crypter::{AeadCrypter, KdfParams};

/// Errors that can occur while encoding or decoding payloads
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Authentication failed: wrong passphrase or corrupted data
    #[error("Decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("Invalid encrypted file: {0}")]
    InvalidFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// A new empty file in `temp_dir`, deleted on drop unless kept
pub(crate) fn scratch_file(temp_dir: &Path, suffix: &str) -> std::io::Result<NamedTempFile> {
    std::fs::create_dir_all(temp_dir)?;
    tempfile::Builder::new()
        .prefix("cloudbak-")
        .suffix(suffix)
        .tempfile_in(temp_dir)
}

/// Hands the file over to the caller, who becomes responsible for removing it
pub(crate) fn keep(file: NamedTempFile) -> Result<PathBuf, CodecError> {
    file.into_temp_path()
        .keep()
        .map_err(|e| CodecError::Io(e.error))
}
