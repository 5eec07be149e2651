//! AwsCliStore against a scripted stand-in for the `aws` binary
//!
//! The scenarios share one test function so only one test in this binary
//! spawns processes at a time.

#![cfg(unix)]

use cloudbak_core::domain::StorageClass;
use cloudbak_core::ports::{IObjectStore, UploadRequest};
use cloudbak_storage::AwsCliStore;

use crate::common::{calls, fake_aws, write_file};

const SCRIPT: &str = r#"
case "$1 $2" in
  "--version ") echo "aws-cli/2.15.0 Python/3.11.6"; exit 0 ;;
  "s3 cp")
    case "$3" in
      s3://*) printf 'payload' > "$4"; exit 0 ;;
      *fail*) echo "upload failed: access denied" >&2; exit 1 ;;
      *) exit 0 ;;
    esac ;;
  "s3 rm") exit 0 ;;
  "s3 ls")
    case "$3" in
      s3://bucket/empty*) exit 1 ;;
      *)
        echo "2024-01-02 03:04:05       1234 home/a b.txt"
        echo "2024-01-02 03:04:06          2 db.sqlite"
        exit 0 ;;
    esac ;;
esac
exit 2
"#;

#[tokio::test]
async fn test_aws_cli_operations() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_aws(dir.path(), SCRIPT);
    let store = AwsCliStore::new(&binary, "bucket");

    // version probe
    assert!(store.version().await.unwrap().starts_with("aws-cli/2"));

    // upload with storage class and no shell quoting
    let local = write_file(&dir.path().join("it's \"x\".enc"), &[0u8; 16]);
    store
        .upload(
            &UploadRequest::new(&local, "/docs/a $b.txt", 16, StorageClass::Standard)
                .with_metadata("hash", "abc"),
        )
        .await
        .unwrap();

    // failed upload surfaces stderr
    let failing = write_file(&dir.path().join("fail.enc"), b"x");
    let err = store
        .upload(&UploadRequest::new(&failing, "/f", 1, StorageClass::StandardIa))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("access denied"));

    // size checked before any process is spawned
    assert!(store
        .upload(&UploadRequest::new(&local, "/docs/x", 99, StorageClass::Standard))
        .await
        .is_err());

    // download creates the destination directory
    let dest = dir.path().join("restore").join("nested").join("db.sqlite");
    store.download("/db.sqlite", &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"payload");

    store.delete("/docs/a $b.txt").await.unwrap();

    // listing
    let objects = store.list("/").await.unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].key, "/home/a b.txt");
    assert_eq!(objects[0].size, 1234);
    assert_eq!(objects[1].key, "/db.sqlite");

    // exit code 1 with no output is an empty listing
    assert!(store.list("/empty").await.unwrap().is_empty());

    let recorded = calls(dir.path());
    let local_arg = local.display().to_string();
    assert_eq!(
        recorded,
        vec![
            "--version".to_string(),
            format!(
                "s3|cp|{}|s3://bucket/docs/a $b.txt|--no-guess-mime-type|--storage-class|STANDARD|--metadata|hash=abc",
                local_arg
            ),
            format!(
                "s3|cp|{}|s3://bucket/f|--no-guess-mime-type|--storage-class|STANDARD_IA",
                failing.display()
            ),
            format!("s3|cp|s3://bucket/db.sqlite|{}", dest.display()),
            "s3|rm|s3://bucket/docs/a $b.txt".to_string(),
            "s3|ls|s3://bucket/|--recursive".to_string(),
            "s3|ls|s3://bucket/empty|--recursive".to_string(),
        ]
    );
}
