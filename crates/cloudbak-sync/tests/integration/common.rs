//! Shared fixtures: in-memory bucket, stores and codec

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cloudbak_cache::{DatabasePool, SqliteContentStore};
use cloudbak_codec::{AeadCrypter, KdfParams, TarArchiver};
use cloudbak_core::domain::StorageClass;
use cloudbak_core::ports::{IConfirm, IObjectStore, ObjectInfo, UploadRequest};
use cloudbak_sync::SessionSettings;

pub const PASSPHRASE: &str = "correct horse battery staple";

pub const DAY_MS: i64 = 24 * 3600 * 1000;

/// An object held by [`MemoryBucket`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub class: StorageClass,
    pub metadata: BTreeMap<String, String>,
}

/// Bucket kept in memory, with injectable failures
#[derive(Debug, Default)]
pub struct MemoryBucket {
    pub objects: Mutex<BTreeMap<String, StoredObject>>,
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    /// Every upload fails
    pub fail_uploads: bool,
    /// Deletes of these keys fail
    pub fail_deletes: Mutex<HashSet<String>>,
}

impl MemoryBucket {
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                class: StorageClass::Standard,
                metadata: BTreeMap::new(),
            },
        );
    }
}

#[async_trait::async_trait]
impl IObjectStore for MemoryBucket {
    async fn upload(&self, request: &UploadRequest) -> anyhow::Result<()> {
        self.uploads.lock().unwrap().push(request.key.clone());
        if self.fail_uploads {
            anyhow::bail!("upload refused: {}", request.key);
        }
        let bytes = std::fs::read(&request.local_path)?;
        self.objects.lock().unwrap().insert(
            request.key.clone(),
            StoredObject {
                bytes,
                class: request.storage_class,
                metadata: request.metadata.clone(),
            },
        );
        Ok(())
    }

    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<()> {
        let object = self
            .object(key)
            .ok_or_else(|| anyhow::anyhow!("no such key: {}", key))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, object.bytes)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.fail_deletes.lock().unwrap().contains(key) {
            anyhow::bail!("delete refused: {}", key);
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.bytes.len() as u64,
                timestamp: 0,
            })
            .collect())
    }
}

/// Confirmation source with a fixed answer, recording the questions
#[derive(Debug, Default)]
pub struct FixedAnswer {
    pub answer: bool,
    pub questions: Mutex<Vec<String>>,
}

impl FixedAnswer {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl IConfirm for FixedAnswer {
    async fn confirm(&self, question: &str) -> anyhow::Result<bool> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answer)
    }
}

pub async fn memory_store() -> Arc<SqliteContentStore> {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    Arc::new(SqliteContentStore::new(pool.pool().clone()))
}

/// File-backed store; the pool is returned so it outlives the test body
pub async fn file_store(db: &Path) -> (DatabasePool, Arc<SqliteContentStore>) {
    let pool = DatabasePool::new(db).await.expect("Failed to open database");
    let store = Arc::new(SqliteContentStore::from_database(&pool));
    (pool, store)
}

pub fn crypter(temp: &Path) -> Arc<AeadCrypter> {
    Arc::new(AeadCrypter::with_params(PASSPHRASE, temp, KdfParams::light()))
}

pub fn archiver(temp: &Path) -> Arc<TarArchiver> {
    Arc::new(TarArchiver::new(temp))
}

pub fn settings(max_session_size: u64, max_session_failures: u32) -> SessionSettings {
    SessionSettings {
        max_session_size,
        max_session_failures,
        random_order: false,
        dry_run: false,
        prefix_remove: Vec::new(),
        ignore_patterns: Vec::new(),
        compress_leaves_patterns: Vec::new(),
    }
}

pub fn write_file(path: &Path, bytes: &[u8]) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

/// Deterministic, non-repeating test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u32).wrapping_mul(31).wrapping_add(seed as u32) % 251) as u8)
        .collect()
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
