//! TransferSession budgets, retention and snapshot upload

use std::sync::Arc;

use cloudbak_core::domain::{LocalEntry, RemoteEntry, StorageClass};
use cloudbak_core::ports::{IArchiver, IContentStore, ICrypter};
use cloudbak_sync::scanner::archive_unit_path;
use cloudbak_sync::{SessionOutcome, TransferSession};

use crate::common::*;

async fn record_file(store: &dyn IContentStore, path: &std::path::Path, hash: &str) -> LocalEntry {
    let size = std::fs::metadata(path).unwrap().len();
    let entry = LocalEntry::file(path_str(path), hash, size);
    store.update_local(&entry).await.unwrap();
    entry
}

#[tokio::test]
async fn test_size_budget_stops_session() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let a = write_file(&dir.path().join("src/a.bin"), &payload(2000, 1));
    let b = write_file(&dir.path().join("src/b.bin"), &payload(2000, 2));

    let store = memory_store().await;
    record_file(store.as_ref(), &a, "ha").await;
    record_file(store.as_ref(), &b, "hb").await;
    let bucket = Arc::new(MemoryBucket::default());

    let session = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(&temp),
        archiver(&temp),
        settings(1024, 10),
    );
    let report = session.run_session().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::MaxSessionSize);
    assert_eq!(report.uploaded, 1);
    assert!(report.uploaded_bytes >= 2000);
    assert_eq!(bucket.keys(), vec![path_str(&a)]);
    // in-memory stores have no snapshot to upload
    assert!(!report.database_uploaded);

    let snapshot = store.get_all().await.unwrap();
    assert!(snapshot.remotes_by_path.contains_key(&path_str(&a)));
    assert!(!snapshot.remotes_by_path.contains_key(&path_str(&b)));
    // no temporary payload is left behind
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failure_budget_stops_session() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let store = memory_store().await;
    for name in ["a", "b", "c"] {
        let file = write_file(&dir.path().join("src").join(name), name.as_bytes());
        record_file(store.as_ref(), &file, name).await;
    }
    let bucket = Arc::new(MemoryBucket::failing_uploads());

    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(&temp),
        archiver(&temp),
        settings(u64::MAX, 2),
    )
    .run_session()
    .await
    .unwrap();

    assert_eq!(report.outcome, SessionOutcome::MaxSessionFailed);
    assert_eq!(report.failed, 2);
    assert_eq!(report.uploaded, 0);
    assert_eq!(
        report.failed_paths,
        vec![
            path_str(&dir.path().join("src/a")),
            path_str(&dir.path().join("src/b"))
        ]
    );
    // the third entry was never attempted
    assert_eq!(bucket.uploads.lock().unwrap().len(), 2);
    assert_eq!(store.get_counts().await.unwrap().remotes, 0);
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_random_order_attempts_each_failing_upload_once() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let store = memory_store().await;
    let names = ["a", "b", "c", "d", "e", "f"];
    for name in names {
        let file = write_file(&dir.path().join("src").join(name), name.as_bytes());
        record_file(store.as_ref(), &file, name).await;
    }
    let bucket = Arc::new(MemoryBucket::failing_uploads());
    let mut session_settings = settings(u64::MAX, 100);
    session_settings.random_order = true;

    let session = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(&temp),
        archiver(&temp),
        session_settings,
    );
    let report = tokio::time::timeout(std::time::Duration::from_secs(30), session.run_session())
        .await
        .expect("session should terminate")
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert_eq!(report.failed as usize, names.len());
    assert_eq!(report.uploaded, 0);

    let attempted = bucket.uploads.lock().unwrap().clone();
    assert_eq!(attempted.len(), names.len());
    let distinct: std::collections::HashSet<_> = attempted.iter().collect();
    assert_eq!(distinct.len(), names.len());

    let mut failed = report.failed_paths.clone();
    failed.sort();
    let expected: Vec<String> = names
        .iter()
        .map(|name| path_str(&dir.path().join("src").join(name)))
        .collect();
    assert_eq!(failed, expected);
    assert_eq!(store.get_counts().await.unwrap().remotes, 0);
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_source_file_counts_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    store
        .update_local(&LocalEntry::file(path_str(&dir.path().join("gone")), "h", 3))
        .await
        .unwrap();
    let bucket = Arc::new(MemoryBucket::default());

    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        settings(u64::MAX, 5),
    )
    .run_session()
    .await
    .unwrap();

    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert_eq!(report.failed, 1);
    assert!(bucket.keys().is_empty());
}

#[tokio::test]
async fn test_retention_defers_recent_infrequent_access_removal() {
    let t0: i64 = 1_700_000_000_000;
    let store = memory_store().await;
    let big = LocalEntry::file("/data/big", "hb", 300 * 1024);
    let small = LocalEntry::file("/data/small", "hs", 100);
    store
        .update_remote(&RemoteEntry::uploaded(&big, 300 * 1024, t0))
        .await
        .unwrap();
    store
        .update_remote(&RemoteEntry::uploaded(&small, 100, t0))
        .await
        .unwrap();
    store.update_local(&big.tombstoned()).await.unwrap();
    store.update_local(&small.tombstoned()).await.unwrap();

    let bucket = Arc::new(MemoryBucket::default());
    bucket.put("/data/big", b"x");
    bucket.put("/data/small", b"y");
    let dir = tempfile::tempdir().unwrap();

    let at = |now: i64| {
        TransferSession::new(
            store.clone(),
            bucket.clone(),
            crypter(dir.path()),
            archiver(dir.path()),
            settings(u64::MAX, 5),
        )
        .with_clock(Arc::new(move || now))
    };

    let report = at(t0 + 10 * DAY_MS).run_session().await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert_eq!(report.removed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(bucket.keys(), vec!["/data/big".to_string()]);
    let snapshot = store.get_all().await.unwrap();
    assert!(snapshot.locals_by_path.contains_key("/data/big"));
    assert!(!snapshot.locals_by_path.contains_key("/data/small"));
    assert!(!snapshot.remotes_by_path.contains_key("/data/small"));

    let report = at(t0 + 32 * DAY_MS).run_session().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.deferred, 0);
    assert!(bucket.keys().is_empty());
    assert_eq!(store.get_counts().await.unwrap().locals, 0);
    assert_eq!(store.get_counts().await.unwrap().remotes, 0);
}

#[tokio::test]
async fn test_failed_removal_keeps_rows() {
    let store = memory_store().await;
    let entry = LocalEntry::file("/data/a", "h", 10);
    store
        .update_remote(&RemoteEntry::uploaded(&entry, 10, 0))
        .await
        .unwrap();
    store.update_local(&entry.tombstoned()).await.unwrap();
    let bucket = Arc::new(MemoryBucket::default());
    bucket.fail_deletes.lock().unwrap().insert("/data/a".to_string());
    let dir = tempfile::tempdir().unwrap();

    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        settings(u64::MAX, 5),
    )
    .run_session()
    .await
    .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    let counts = store.get_counts().await.unwrap();
    assert_eq!((counts.locals, counts.remotes), (1, 1));
}

#[tokio::test]
async fn test_removal_continues_after_size_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    let file = write_file(&dir.path().join("src/new"), &payload(4096, 3));
    record_file(store.as_ref(), &file, "hn").await;
    let old = LocalEntry::file("/old", "ho", 10);
    store
        .update_remote(&RemoteEntry::uploaded(&old, 10, 0))
        .await
        .unwrap();
    store.update_local(&old.tombstoned()).await.unwrap();
    let bucket = Arc::new(MemoryBucket::default());
    bucket.put("/old", b"o");

    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        settings(100, 5),
    )
    .run_session()
    .await
    .unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.outcome, SessionOutcome::MaxSessionSize);
    assert_eq!(bucket.keys(), vec![path_str(&file)]);
}

#[tokio::test]
async fn test_dry_run_records_without_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    let a = write_file(&dir.path().join("src/a"), &payload(500, 1));
    let b = write_file(&dir.path().join("src/b"), &payload(700, 2));
    record_file(store.as_ref(), &a, "ha").await;
    record_file(store.as_ref(), &b, "hb").await;
    let bucket = Arc::new(MemoryBucket::default());

    let mut dry = settings(u64::MAX, 5);
    dry.dry_run = true;
    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        dry,
    )
    .run_session()
    .await
    .unwrap();

    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.uploaded_bytes, 1200);
    assert!(bucket.uploads.lock().unwrap().is_empty());
    let snapshot = store.get_all().await.unwrap();
    assert_eq!(snapshot.remotes.len(), 2);
    assert!(snapshot.remotes.iter().all(|r| r.size == 0));
}

#[tokio::test]
async fn test_archive_unit_upload_and_prefix_removal() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let album = dir.path().join("src/albums/trip");
    write_file(&album.join("1.jpg"), &payload(3000, 1));
    write_file(&album.join("2.jpg"), &payload(5000, 2));
    // excluded by the scanner, so it must stay out of the archive too
    write_file(&album.join("thumbs.ignored"), b"cache");
    let unit = path_str(&archive_unit_path(&album));

    let store = memory_store().await;
    store
        .update_local(&LocalEntry::archive(unit.clone(), "hx", 8000))
        .await
        .unwrap();
    let bucket = Arc::new(MemoryBucket::default());
    let mut session_settings = settings(u64::MAX, 5);
    session_settings.prefix_remove = vec![path_str(&dir.path().join("src"))];
    session_settings.ignore_patterns = vec![".ignored".to_string()];
    session_settings.compress_leaves_patterns = vec!["/albums/".to_string()];

    let crypt = crypter(&temp);
    let arch = archiver(&temp);
    let report = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypt.clone(),
        arch.clone(),
        session_settings,
    )
    .run_session()
    .await
    .unwrap();
    assert_eq!(report.uploaded, 1);

    let object = bucket.object("/albums/trip/trip.tar").expect("archive object");
    assert_eq!(object.metadata.get("type").map(String::as_str), Some("archive"));
    assert_eq!(object.class, StorageClass::Standard);

    // decode what the bucket holds and compare with the album
    let enc = write_file(&dir.path().join("check/trip.enc"), &object.bytes);
    let tar = dir.path().join("check/trip.tar");
    crypt.decrypt(&enc, &tar).await.unwrap();
    let out = dir.path().join("check/out");
    arch.decompress(&tar, &out).await.unwrap();
    assert_eq!(std::fs::read(out.join("1.jpg")).unwrap(), payload(3000, 1));
    assert_eq!(std::fs::read(out.join("2.jpg")).unwrap(), payload(5000, 2));
    assert!(!out.join("thumbs.ignored").exists());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_archive_unit_without_members_fails() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let album = dir.path().join("src/albums/trip");
    write_file(&album.join("1.jpg.ignored"), b"only an excluded file");
    let unit = path_str(&archive_unit_path(&album));

    let store = memory_store().await;
    store
        .update_local(&LocalEntry::archive(unit.clone(), "hx", 21))
        .await
        .unwrap();
    let bucket = Arc::new(MemoryBucket::default());
    let mut session_settings = settings(u64::MAX, 5);
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

    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert_eq!(report.failed_paths, vec![unit]);
    assert!(bucket.keys().is_empty());
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_large_payload_uses_infrequent_access() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    let file = write_file(&dir.path().join("src/big"), &payload(200 * 1024, 9));
    record_file(store.as_ref(), &file, "hb").await;
    let bucket = Arc::new(MemoryBucket::default());

    TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        settings(u64::MAX, 5),
    )
    .run_session()
    .await
    .unwrap();

    let object = bucket.object(&path_str(&file)).unwrap();
    assert_eq!(object.class, StorageClass::StandardIa);
    let remote = store.get_all().await.unwrap().remotes_by_path[&path_str(&file)].clone();
    assert_eq!(remote.size, object.bytes.len() as u64);
    assert_eq!(remote.hash, "hb");
}

#[tokio::test]
async fn test_database_snapshot_uploaded_after_work() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, store) = file_store(&dir.path().join("db/backup.sqlite")).await;
    let file = write_file(&dir.path().join("src/a"), b"hello");
    record_file(store.as_ref(), &file, "ha").await;
    let bucket = Arc::new(MemoryBucket::default());

    let session = TransferSession::new(
        store.clone(),
        bucket.clone(),
        crypter(dir.path()),
        archiver(dir.path()),
        settings(u64::MAX, 5),
    );
    let report = session.run_session().await.unwrap();
    assert!(report.database_uploaded);
    let snapshot = bucket.object("/backup.sqlite").expect("snapshot");
    assert_eq!(snapshot.class, StorageClass::Standard);
    assert!(snapshot.bytes.starts_with(b"SQLite format 3\0"));

    // an idle session leaves the snapshot alone
    bucket.uploads.lock().unwrap().clear();
    let report = session.run_session().await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::NoFilesLeft);
    assert!(!report.database_uploaded);
    assert!(bucket.uploads.lock().unwrap().is_empty());
}
