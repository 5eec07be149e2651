//! Backup then restore through a directory bucket

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloudbak_cache::{DatabasePool, SqliteContentStore};
use cloudbak_core::ports::{AssumeYes, IConfirm};
use cloudbak_storage::DirectoryStore;
use cloudbak_sync::{RestoreOptions, Restorer, ScanSettings, Scanner, TransferSession, WalkDirScanner};

use crate::common::*;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    src: PathBuf,
    temp: PathBuf,
    bucket: Arc<DirectoryStore>,
    _pool: DatabasePool,
    _store: Arc<SqliteContentStore>,
}

impl Fixture {
    fn restorer(&self, confirm: Arc<dyn IConfirm>) -> Restorer {
        Restorer::new(
            self.bucket.clone(),
            crypter(&self.temp),
            archiver(&self.temp),
            confirm,
            "/backup.sqlite",
            vec![path_str(&self.src)],
            &self.temp,
        )
    }

    fn out(&self) -> PathBuf {
        self.root.join("out")
    }
}

fn options(prefix: &str, output: &Path) -> RestoreOptions {
    RestoreOptions {
        prefix: prefix.to_string(),
        output: output.to_path_buf(),
        test_mode: false,
        dry_run: false,
        assume_yes: true,
    }
}

/// Scans and backs up a small tree into a directory bucket
async fn backed_up() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let src = root.join("src");
    let temp = root.join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    write_file(&src.join("a.txt"), &payload(1024, 1));
    write_file(&src.join("sub/b.bin"), &payload(200 * 1024, 2));
    write_file(&src.join("albums/trip/1.jpg"), &payload(3000, 3));
    write_file(&src.join("albums/trip/2.jpg"), &payload(4000, 4));
    write_file(&src.join("albums/trip/Thumbs.db.ignored"), b"cache");

    let (pool, store) = file_store(&root.join("db/backup.sqlite")).await;
    Scanner::new(
        store.clone(),
        Arc::new(WalkDirScanner::new(vec![".ignored".to_string()])),
        ScanSettings {
            sources: vec![src.clone()],
            compress_leaves_patterns: vec!["/albums/".to_string()],
            interval_ms: 0,
        },
    )
    .scan_now(1)
    .await
    .unwrap();

    let bucket = Arc::new(DirectoryStore::new(root.join("bucket")));
    let mut session_settings = settings(u64::MAX, 5);
    session_settings.prefix_remove = vec![path_str(&src)];
    session_settings.ignore_patterns = vec![".ignored".to_string()];
    session_settings.compress_leaves_patterns = vec!["/albums/".to_string()];
    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(&temp),
        archiver(&temp),
        session_settings,
    )
    .run_session()
    .await
    .unwrap();
    assert_eq!(report.uploaded, 3);
    assert!(report.database_uploaded);
    assert!(root.join("bucket/backup.sqlite").exists());

    Fixture {
        _dir: dir,
        root,
        src,
        temp,
        bucket,
        _pool: pool,
        _store: store,
    }
}

#[tokio::test]
async fn test_restore_everything() {
    let fx = backed_up().await;
    let report = fx
        .restorer(Arc::new(AssumeYes))
        .restore(&options("/", &fx.out()))
        .await
        .unwrap();

    assert_eq!(report.matched, 3);
    assert_eq!(report.restored, 3);
    assert!(report.failed.is_empty());
    assert_eq!(std::fs::read(fx.out().join("a.txt")).unwrap(), payload(1024, 1));
    assert_eq!(
        std::fs::read(fx.out().join("sub/b.bin")).unwrap(),
        payload(200 * 1024, 2)
    );
    assert_eq!(
        std::fs::read(fx.out().join("albums/trip/1.jpg")).unwrap(),
        payload(3000, 3)
    );
    assert_eq!(
        std::fs::read(fx.out().join("albums/trip/2.jpg")).unwrap(),
        payload(4000, 4)
    );
    assert!(!fx.out().join("albums/trip/Thumbs.db.ignored").exists());
    assert_eq!(std::fs::read_dir(fx.out().join("albums/trip")).unwrap().count(), 2);
    assert_eq!(std::fs::read_dir(&fx.temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_restore_prefix_and_confirmation() {
    let fx = backed_up().await;
    let confirm = Arc::new(FixedAnswer::new(true));
    let report = fx
        .restorer(confirm.clone())
        .restore(&RestoreOptions {
            assume_yes: false,
            ..options("sub", &fx.out())
        })
        .await
        .unwrap();

    assert_eq!(report.matched, 1);
    assert_eq!(report.restored, 1);
    assert!(fx.out().join("sub/b.bin").exists());
    assert!(!fx.out().join("a.txt").exists());
    let questions = confirm.questions.lock().unwrap();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].starts_with("Restore 1 files"));
}

#[tokio::test]
async fn test_restore_declined() {
    let fx = backed_up().await;
    let report = fx
        .restorer(Arc::new(FixedAnswer::new(false)))
        .restore(&RestoreOptions {
            assume_yes: false,
            ..options("/", &fx.out())
        })
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.restored, 0);
    assert!(!fx.out().exists());
}

#[tokio::test]
async fn test_restore_dry_run_lists_keys() {
    let fx = backed_up().await;
    let report = fx
        .restorer(Arc::new(FixedAnswer::new(false)))
        .restore(&RestoreOptions {
            dry_run: true,
            ..options("/", &fx.out())
        })
        .await
        .unwrap();

    let mut listed = report.listed.clone();
    listed.sort();
    assert_eq!(listed, vec!["/a.txt", "/albums/trip/trip.tar", "/sub/b.bin"]);
    assert!(!fx.out().exists());
}

#[tokio::test]
async fn test_restore_without_match() {
    let fx = backed_up().await;
    let report = fx
        .restorer(Arc::new(AssumeYes))
        .restore(&options("/nothing", &fx.out()))
        .await
        .unwrap();
    assert_eq!(report.matched, 0);
    assert!(!fx.out().exists());
}

#[tokio::test]
async fn test_restore_test_mode_compares_with_originals() {
    let fx = backed_up().await;
    let test_options = RestoreOptions {
        test_mode: true,
        ..options("/", &fx.out())
    };

    let report = fx
        .restorer(Arc::new(AssumeYes))
        .restore(&test_options)
        .await
        .unwrap();
    assert_eq!(report.restored, 3);
    assert!(report.mismatched.is_empty());
    assert!(report.failed.is_empty());
    assert!(!fx.out().exists());

    std::fs::write(fx.src.join("a.txt"), b"changed").unwrap();
    std::fs::write(fx.src.join("albums/trip/2.jpg"), payload(4000, 9)).unwrap();
    std::fs::remove_file(fx.src.join("sub/b.bin")).unwrap();
    std::fs::remove_dir(fx.src.join("sub")).unwrap();
    let report = fx
        .restorer(Arc::new(AssumeYes))
        .restore(&test_options)
        .await
        .unwrap();
    assert_eq!(report.restored, 0);
    let mut mismatched = report.mismatched.clone();
    mismatched.sort();
    assert_eq!(mismatched, vec!["/a.txt", "/albums/trip/trip.tar"]);
    assert_eq!(report.failed, vec!["/sub/b.bin".to_string()]);
    assert_eq!(std::fs::read_dir(&fx.temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_restore_requires_snapshot() {
    let fx = backed_up().await;
    std::fs::remove_file(fx.root.join("bucket/backup.sqlite")).unwrap();
    let result = fx
        .restorer(Arc::new(AssumeYes))
        .restore(&options("/", &fx.out()))
        .await;
    assert!(result.is_err());
}
