//! Passphrase-based file encryption
//!
//! Implements [`ICrypter`] with Argon2id key derivation and chunked
//! AES-256-GCM. Files are processed in a streaming fashion so memory use
//! does not depend on file size.
//!
//! ## File Format
//!
//! ```text
//! "CBAK" | version (1) | t_cost u32le | m_cost u32le | p_cost u32le
//!        | salt (16) | nonce prefix (7)
//! chunk* : ciphertext of up to CHUNK_SIZE plaintext bytes + 16-byte tag
//! ```
//!
//! The nonce of chunk `i` is `prefix || i as u32be || last_flag`. The final
//! chunk always carries less than `CHUNK_SIZE` plaintext bytes (possibly
//! none), so truncation at a chunk boundary is detected. The whole header is
//! bound as associated data to every chunk.
//!
//! Cost parameters are read before anything is authenticated, so headers
//! asking for more than [`KdfParams::MAX`] are rejected as corrupt.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use cloudbak_core::ports::{EncryptedFile, ICrypter};

use crate::{keep, scratch_file, CodecError};

const MAGIC: &[u8; 4] = b"CBAK";
const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_PREFIX_LEN: usize = 7;
const HEADER_LEN: usize = 4 + 1 + 12 + SALT_LEN + NONCE_PREFIX_LEN;
const TAG_LEN: usize = 16;

/// Plaintext bytes per encrypted chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KdfParams {
    pub time_cost: u32,
    /// Memory cost in KiB
    pub memory_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost: 65536, // 64 MiB
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Highest costs accepted from an encrypted file's header
    pub const MAX: KdfParams = KdfParams {
        time_cost: 10,
        memory_cost: 1024 * 1024, // 1 GiB
        parallelism: 16,
    };

    /// Minimal costs, for tests only
    pub fn light() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 64,
            parallelism: 1,
        }
    }

    fn within(&self, max: &KdfParams) -> bool {
        self.time_cost <= max.time_cost
            && self.memory_cost <= max.memory_cost
            && self.parallelism <= max.parallelism
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    params: KdfParams,
    salt: [u8; SALT_LEN],
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = FORMAT_VERSION;
        out[5..9].copy_from_slice(&self.params.time_cost.to_le_bytes());
        out[9..13].copy_from_slice(&self.params.memory_cost.to_le_bytes());
        out[13..17].copy_from_slice(&self.params.parallelism.to_le_bytes());
        out[17..17 + SALT_LEN].copy_from_slice(&self.salt);
        out[17 + SALT_LEN..].copy_from_slice(&self.nonce_prefix);
        out
    }

    fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, CodecError> {
        if &bytes[0..4] != MAGIC {
            return Err(CodecError::InvalidFormat("missing CBAK magic".into()));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(CodecError::InvalidFormat(format!(
                "unsupported format version {}",
                bytes[4]
            )));
        }
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[17..17 + SALT_LEN]);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        nonce_prefix.copy_from_slice(&bytes[17 + SALT_LEN..]);
        let params = KdfParams {
            time_cost: u32_at(5),
            memory_cost: u32_at(9),
            parallelism: u32_at(13),
        };
        if !params.within(&KdfParams::MAX) {
            return Err(CodecError::InvalidFormat(format!(
                "key derivation costs out of range (t={}, m={} KiB, p={})",
                params.time_cost, params.memory_cost, params.parallelism
            )));
        }
        Ok(Self {
            params,
            salt,
            nonce_prefix,
        })
    }
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LEN], index: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&index.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Derive a 32-byte key from the passphrase with Argon2id
fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CodecError> {
    let argon_params = argon2::Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CodecError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| CodecError::KeyDerivation(format!("argon2: {e}")))?;
    Ok(key)
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// AeadCrypter
// ============================================================================

#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKey {
    salt: [u8; SALT_LEN],
    key: [u8; 32],
}

struct CrypterInner {
    passphrase: Zeroizing<String>,
    temp_dir: PathBuf,
    params: KdfParams,
    /// Key used for every encryption by this instance, derived on first use
    session: Mutex<Option<SessionKey>>,
    /// Keys derived while decrypting, by salt and cost parameters
    derived: Mutex<HashMap<([u8; SALT_LEN], KdfParams), Zeroizing<[u8; 32]>>>,
}

/// Encrypts files with a passphrase using Argon2id and AES-256-GCM
///
/// One random salt (and therefore one key derivation) is used for all files
/// encrypted by an instance; each file gets a fresh random nonce prefix.
#[derive(Clone)]
pub struct AeadCrypter {
    inner: Arc<CrypterInner>,
}

impl std::fmt::Debug for AeadCrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCrypter")
            .field("temp_dir", &self.inner.temp_dir)
            .field("params", &self.inner.params)
            .finish_non_exhaustive()
    }
}

impl AeadCrypter {
    /// Creates a crypter with default Argon2id costs
    pub fn new(passphrase: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self::with_params(passphrase, temp_dir, KdfParams::default())
    }

    pub fn with_params(
        passphrase: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        params: KdfParams,
    ) -> Self {
        Self {
            inner: Arc::new(CrypterInner {
                passphrase: Zeroizing::new(passphrase.into()),
                temp_dir: temp_dir.into(),
                params,
                session: Mutex::new(None),
                derived: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl CrypterInner {
    fn session_key(&self) -> Result<([u8; SALT_LEN], Zeroizing<[u8; 32]>), CodecError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| CodecError::KeyDerivation("session key lock poisoned".into()))?;
        if let Some(existing) = session.as_ref() {
            return Ok((existing.salt, Zeroizing::new(existing.key)));
        }
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let key = derive_key(&self.passphrase, &salt, &self.params)?;
        *session = Some(SessionKey { salt, key: *key });
        Ok((salt, key))
    }

    fn key_for(&self, header: &Header) -> Result<Zeroizing<[u8; 32]>, CodecError> {
        {
            let session = self
                .session
                .lock()
                .map_err(|_| CodecError::KeyDerivation("session key lock poisoned".into()))?;
            if let Some(existing) = session.as_ref() {
                if existing.salt == header.salt && header.params == self.params {
                    return Ok(Zeroizing::new(existing.key));
                }
            }
        }

        let mut derived = self
            .derived
            .lock()
            .map_err(|_| CodecError::KeyDerivation("key cache lock poisoned".into()))?;
        if let Some(key) = derived.get(&(header.salt, header.params)) {
            return Ok(key.clone());
        }
        let key = derive_key(&self.passphrase, &header.salt, &header.params)?;
        derived.insert((header.salt, header.params), key.clone());
        Ok(key)
    }

    fn encrypt_file(&self, input: &Path, output: &mut File) -> Result<u64, CodecError> {
        let (salt, key) = self.session_key()?;
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_prefix);
        let header = Header {
            params: self.params,
            salt,
            nonce_prefix,
        };
        let aad = header.to_bytes();
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CodecError::KeyDerivation(format!("cipher init: {e}")))?;

        let mut reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(output);
        writer.write_all(&aad)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut index: u32 = 0;
        loop {
            let n = read_full(&mut reader, &mut buf)?;
            let last = n < CHUNK_SIZE;
            let nonce = chunk_nonce(&nonce_prefix, index, last);
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &buf[..n],
                        aad: &aad,
                    },
                )
                .map_err(|e| CodecError::Encryption(format!("AES-GCM encrypt: {e}")))?;
            writer.write_all(&ciphertext)?;
            if last {
                break;
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| CodecError::Encryption("file too large".into()))?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| CodecError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }

    fn decrypt_file(&self, input: &Path, output: &mut File) -> Result<(), CodecError> {
        let mut reader = BufReader::new(File::open(input)?);
        let mut header_bytes = [0u8; HEADER_LEN];
        if read_full(&mut reader, &mut header_bytes)? != HEADER_LEN {
            return Err(CodecError::InvalidFormat("file shorter than header".into()));
        }
        let header = Header::parse(&header_bytes)?;
        let key = self.key_for(&header)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CodecError::KeyDerivation(format!("cipher init: {e}")))?;

        let mut writer = BufWriter::new(output);
        let mut buf = vec![0u8; CHUNK_SIZE + TAG_LEN];
        let mut index: u32 = 0;
        loop {
            let n = read_full(&mut reader, &mut buf)?;
            if n < TAG_LEN {
                return Err(CodecError::InvalidFormat("truncated ciphertext".into()));
            }
            let last = n < CHUNK_SIZE + TAG_LEN;
            let nonce = chunk_nonce(&header.nonce_prefix, index, last);
            let plaintext = cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &buf[..n],
                        aad: &header_bytes,
                    },
                )
                .map_err(|_| CodecError::DecryptionFailed)?;
            writer.write_all(&plaintext)?;
            if last {
                break;
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| CodecError::InvalidFormat("too many chunks".into()))?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ICrypter for AeadCrypter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn encrypt(&self, path: &Path) -> anyhow::Result<EncryptedFile> {
        let inner = Arc::clone(&self.inner);
        let input = path.to_path_buf();

        let (output, size) = tokio::task::spawn_blocking(move || -> Result<_, CodecError> {
            let mut scratch = scratch_file(&inner.temp_dir, ".enc")?;
            let size = inner.encrypt_file(&input, scratch.as_file_mut())?;
            Ok((keep(scratch)?, size))
        })
        .await??;

        debug!(temp = %output.display(), size, "Encrypted");
        Ok(EncryptedFile { path: output, size })
    }

    #[instrument(skip(self), fields(input = %input.display(), output = %output.display()))]
    async fn decrypt(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let inner = Arc::clone(&self.inner);
        let input = input.to_path_buf();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), CodecError> {
            let parent = match output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&parent)?;
            // Plaintext only appears under its final name once every chunk
            // authenticated.
            let mut partial = tempfile::Builder::new()
                .prefix(".cloudbak-")
                .suffix(".part")
                .tempfile_in(&parent)?;
            inner.decrypt_file(&input, partial.as_file_mut())?;
            partial.persist(&output).map_err(|e| CodecError::Io(e.error))?;
            Ok(())
        })
        .await??;

        debug!("Decrypted");
        Ok(())
    }
}
