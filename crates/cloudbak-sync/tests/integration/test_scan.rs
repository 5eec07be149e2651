//! Scanner against real source trees

use std::path::PathBuf;
use std::sync::Arc;

use cloudbak_core::domain::{file_identity, EntryType, LocalEntry, RemoteEntry, DELETED};
use cloudbak_core::ports::{IContentStore, SETTING_LAST_SCAN};
use cloudbak_sync::{ScanOutcome, ScanSettings, Scanner, WalkDirScanner};

use crate::common::*;

const INTERVAL: u64 = 3_600_000;

fn scanner(store: Arc<dyn IContentStore>, sources: Vec<PathBuf>, patterns: &[&str]) -> Scanner {
    Scanner::new(
        store,
        Arc::new(WalkDirScanner::new(vec!["/.git/".to_string()])),
        ScanSettings {
            sources,
            compress_leaves_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            interval_ms: INTERVAL,
        },
    )
}

fn completed(outcome: ScanOutcome) -> cloudbak_sync::ScanReport {
    match outcome {
        ScanOutcome::Completed(report) => report,
        other => panic!("expected a completed scan, got {:?}", other),
    }
}

#[tokio::test]
async fn test_first_scan_records_files_and_interval_gates() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let a = write_file(&src.join("a.txt"), &payload(1024, 1));
    write_file(&src.join("docs/b.txt"), &payload(100 * 1024, 2));
    write_file(&src.join("docs/c.bin"), &payload(200 * 1024, 3));
    write_file(&src.join(".git/HEAD"), b"ref");

    let store = memory_store().await;
    let scan = scanner(store.clone(), vec![src.clone()], &[]);

    let report = completed(scan.scan(1_000).await.unwrap());
    assert_eq!(report.sources_scanned, 1);
    assert_eq!(report.files, 3);
    assert_eq!(report.updated, 3);

    let locals = store.get_all_locals().await.unwrap();
    assert_eq!(locals.len(), 3);
    let first = &locals[0];
    assert_eq!(first.path, path_str(&a));
    assert_eq!(first.size, 1024);
    assert_eq!(first.entry_type, EntryType::File);
    let mtime = std::fs::metadata(&a)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    assert_eq!(first.hash, file_identity(&path_str(&a), 1024, mtime));
    assert_eq!(
        store.get_setting_i64(SETTING_LAST_SCAN, 0).await.unwrap(),
        1_000
    );

    // too early
    match scan.scan(1_000 + INTERVAL as i64 - 1).await.unwrap() {
        ScanOutcome::Skipped { last_scan, next_scan_at } => {
            assert_eq!(last_scan, 1_000);
            assert_eq!(next_scan_at, 1_000 + INTERVAL as i64);
        }
        other => panic!("expected a skipped scan, got {:?}", other),
    }

    // due again, nothing changed
    let report = completed(scan.scan(1_000 + INTERVAL as i64).await.unwrap());
    assert_eq!(report.files, 3);
    assert_eq!(report.updated, 0);
    assert_eq!(report.tombstoned, 0);
}

#[tokio::test]
async fn test_changed_file_gets_new_identity() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let a = write_file(&src.join("a.txt"), b"one");
    let store = memory_store().await;
    let scan = scanner(store.clone(), vec![src.clone()], &[]);
    scan.scan_now(1).await.unwrap();
    let before = store.get_all_locals().await.unwrap()[0].clone();

    std::fs::write(&a, b"a longer body").unwrap();
    let report = scan.scan_now(2).await.unwrap();
    assert_eq!(report.updated, 1);
    let after = store.get_all_locals().await.unwrap()[0].clone();
    assert_eq!(after.size, 13);
    assert_ne!(after.hash, before.hash);
}

#[tokio::test]
async fn test_deleted_files_tombstoned_or_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let kept = write_file(&src.join("kept"), b"k");
    let uploaded = write_file(&src.join("uploaded"), b"u");
    let fresh = write_file(&src.join("fresh"), b"f");
    let store = memory_store().await;
    let scan = scanner(store.clone(), vec![src.clone()], &[]);
    scan.scan_now(1).await.unwrap();

    let entry = store.get_all().await.unwrap().locals_by_path[&path_str(&uploaded)].clone();
    store
        .update_remote(&RemoteEntry::uploaded(&entry, 1, 1))
        .await
        .unwrap();

    std::fs::remove_file(&uploaded).unwrap();
    std::fs::remove_file(&fresh).unwrap();
    let report = scan.scan_now(2).await.unwrap();
    assert_eq!(report.tombstoned, 2);
    assert_eq!(report.pruned, 1);

    let snapshot = store.get_all().await.unwrap();
    assert_eq!(snapshot.locals_by_path[&path_str(&uploaded)].hash, DELETED);
    assert!(!snapshot.locals_by_path.contains_key(&path_str(&fresh)));
    assert_ne!(snapshot.locals_by_path[&path_str(&kept)].hash, DELETED);

    // a tombstone is not tombstoned again
    let report = scan.scan_now(3).await.unwrap();
    assert_eq!(report.tombstoned, 0);
}

#[tokio::test]
async fn test_entries_outside_sources_tombstoned() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let other = dir.path().join("src-old");
    write_file(&src.join("a"), b"a");
    let store = memory_store().await;

    let moved = LocalEntry::file(path_str(&other.join("b")), "hb", 1);
    store.update_local(&moved).await.unwrap();
    store
        .update_remote(&RemoteEntry::uploaded(&moved, 1, 1))
        .await
        .unwrap();

    let report = scanner(store.clone(), vec![src.clone()], &[])
        .scan_now(1)
        .await
        .unwrap();
    // "src-old" shares a string prefix with "src" but is not below it
    assert_eq!(report.tombstoned, 1);
    let snapshot = store.get_all().await.unwrap();
    assert_eq!(snapshot.locals_by_path[&moved.path].hash, DELETED);
}

#[tokio::test]
async fn test_unreadable_or_empty_source_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let empty = dir.path().join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    let store = memory_store().await;
    let a = LocalEntry::file(path_str(&missing.join("a")), "ha", 1);
    let b = LocalEntry::file(path_str(&empty.join("b")), "hb", 1);
    for entry in [&a, &b] {
        store.update_local(entry).await.unwrap();
        store
            .update_remote(&RemoteEntry::uploaded(entry, 1, 1))
            .await
            .unwrap();
    }

    let report = scanner(store.clone(), vec![missing, empty], &[])
        .scan_now(1)
        .await
        .unwrap();
    assert_eq!(report.sources_skipped, 2);
    assert_eq!(report.tombstoned, 0);
    let locals = store.get_all_locals().await.unwrap();
    assert_eq!(locals, vec![b, a]);
}

#[tokio::test]
async fn test_compressed_leaves_become_archive_units() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write_file(&src.join("albums/trip/1.jpg"), &payload(10, 1));
    write_file(&src.join("albums/trip/2.jpg"), &payload(20, 2));
    write_file(&src.join("albums/home/1.jpg"), &payload(30, 3));
    write_file(&src.join("notes.txt"), b"n");
    let store = memory_store().await;
    let scan = scanner(store.clone(), vec![src.clone()], &["/albums/"]);

    let report = scan.scan_now(1).await.unwrap();
    assert_eq!(report.files, 1);
    assert_eq!(report.archives, 2);

    let snapshot = store.get_all().await.unwrap();
    let trip = &snapshot.locals_by_path[&path_str(&src.join("albums/trip/trip.tar"))];
    assert_eq!(trip.entry_type, EntryType::Archive);
    assert_eq!(trip.size, 30);
    assert!(snapshot
        .locals_by_path
        .contains_key(&path_str(&src.join("albums/home/home.tar"))));
    assert!(!snapshot
        .locals_by_path
        .contains_key(&path_str(&src.join("albums/trip/1.jpg"))));

    // a member change changes the unit identity
    let before = trip.hash.clone();
    std::fs::write(src.join("albums/trip/2.jpg"), payload(25, 2)).unwrap();
    let report = scan.scan_now(2).await.unwrap();
    assert_eq!(report.updated, 1);
    let after = store.get_all().await.unwrap().locals_by_path
        [&path_str(&src.join("albums/trip/trip.tar"))]
        .clone();
    assert_ne!(after.hash, before);
    assert_eq!(after.size, 35);
}
