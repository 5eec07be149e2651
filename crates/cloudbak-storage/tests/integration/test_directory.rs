//! DirectoryStore behaviour

use cloudbak_core::domain::StorageClass;
use cloudbak_core::ports::{IObjectStore, UploadRequest};
use cloudbak_storage::DirectoryStore;

use crate::common::write_file;

#[tokio::test]
async fn test_upload_download_delete_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("bucket"));
    let source = write_file(&dir.path().join("src").join("it's $x.txt"), b"hello");

    store
        .upload(&UploadRequest::new(
            &source,
            "/docs/it's $x.txt",
            5,
            StorageClass::Standard,
        ))
        .await
        .unwrap();
    assert!(dir.path().join("bucket/docs/it's $x.txt").exists());

    let dest = dir.path().join("restore").join("copy.txt");
    store.download("/docs/it's $x.txt", &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

    store.delete("/docs/it's $x.txt").await.unwrap();
    assert!(!dir.path().join("bucket/docs/it's $x.txt").exists());
    // absent objects delete cleanly
    store.delete("/docs/it's $x.txt").await.unwrap();
}

#[tokio::test]
async fn test_upload_rejects_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("bucket"));
    let source = write_file(&dir.path().join("a.bin"), b"12345");

    let err = store
        .upload(&UploadRequest::new(&source, "/a.bin", 9, StorageClass::StandardIa))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Size mismatch"));
    assert!(!dir.path().join("bucket/a.bin").exists());
}

#[tokio::test]
async fn test_upload_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("bucket"));
    let result = store
        .upload(&UploadRequest::new(
            dir.path().join("absent"),
            "/absent",
            0,
            StorageClass::Standard,
        ))
        .await;
    assert!(result.is_err());
    assert!(store.list("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_missing_object_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("bucket"));
    assert!(store
        .download("/nope", &dir.path().join("out"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_list_reports_keys_sizes_and_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = dir.path().join("bucket");
    write_file(&bucket.join("db.sqlite"), b"db");
    write_file(&bucket.join("home/a.txt"), b"aaa");
    write_file(&bucket.join("home/sub/b.txt"), b"bbbb");
    let store = DirectoryStore::new(&bucket);

    let all = store.list("/").await.unwrap();
    let keys: Vec<(&str, u64)> = all.iter().map(|o| (o.key.as_str(), o.size)).collect();
    assert_eq!(
        keys,
        vec![("/db.sqlite", 2), ("/home/a.txt", 3), ("/home/sub/b.txt", 4)]
    );
    assert!(all.iter().all(|o| o.timestamp > 0));

    let home = store.list("/home/sub").await.unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(home[0].key, "/home/sub/b.txt");
}

#[tokio::test]
async fn test_list_of_missing_root_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("never-created"));
    assert!(store.list("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keys_outside_root_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("bucket"));
    let source = write_file(&dir.path().join("a"), b"a");
    assert!(store
        .upload(&UploadRequest::new(&source, "/../escape", 0, StorageClass::Standard))
        .await
        .is_err());
    assert!(store.delete("relative").await.is_err());
}
