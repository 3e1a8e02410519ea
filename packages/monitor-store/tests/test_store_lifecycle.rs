//! Integration tests for the transaction store lifecycle
//!
//! - submit, load, move and delete of one record end to end
//! - cache behaviour of `get`
//! - startup pruning against the watermark
//! - bulk clears with progress

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use monitor_store::codec::XmlRecordCodec;
use monitor_store::infrastructure::Location;
use monitor_store::{
    ErrorKind, Partition, ProgressSink, RecordCodec, StoreConfig, TransactionRecord,
    TransactionStore,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const ID: &str = "1700000000000";

fn record(id: &str) -> TransactionRecord {
    TransactionRecord::new(id, "GET", "/app/index.jsp", "localhost", 8080)
        .with_status(200)
        .with_header("Accept", "text/html")
}

async fn open(root: &Path) -> TransactionStore {
    let store = TransactionStore::new(StoreConfig::new(root), XmlRecordCodec);
    store.initialize().await.expect("initialize failed");
    store
}

#[derive(Default)]
struct Percentages(Mutex<Vec<u8>>);

impl ProgressSink for Percentages {
    fn progress(&self, percent: u8) {
        self.0.lock().push(percent);
    }
}

#[tokio::test]
async fn test_record_lifecycle_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;

    let bytes = XmlRecordCodec.write(&record(ID)).unwrap();
    assert!(store.submit(ID, bytes).await.unwrap());

    let ids = store.load_all().await.unwrap();
    assert_eq!(ids.current, vec![ID]);
    assert!(ids.saved.is_empty());

    let report = store
        .move_records([ID], Partition::Current, Partition::Saved)
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.moved, vec![ID]);

    let ids = store.load_all().await.unwrap();
    assert!(ids.current.is_empty());
    assert_eq!(ids.saved, vec![ID]);

    let report = store.delete([ID], None).unwrap().wait().await.unwrap();
    assert_eq!(report.completed, vec![ID]);

    let ids = store.load_all().await.unwrap();
    assert!(ids.current.is_empty());
    assert!(ids.saved.is_empty());
}

#[tokio::test]
async fn test_cached_get_does_not_touch_disk() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    assert!(store.add_record(record(ID)).await.unwrap());

    std::fs::remove_file(store.files().path(Location::Current, ID)).unwrap();

    let cached = store.get(ID, Partition::Current, true).await.unwrap();
    assert_eq!(cached.as_deref(), Some(&record(ID)));

    // Bypassing the cache hits the missing file
    assert!(store.get(ID, Partition::Current, false).await.unwrap().is_none());
}

#[tokio::test]
async fn test_add_reads_capture_file() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;

    let path = store.files().path(Location::Current, ID);
    std::fs::write(&path, XmlRecordCodec.write(&record(ID)).unwrap()).unwrap();

    assert!(store.add(ID).await.unwrap());
    assert!(!store.add("404").await.unwrap());
    assert_eq!(store.ids(Partition::Current), vec![ID]);
}

#[tokio::test]
async fn test_move_then_get() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store.add_record(record(ID)).await.unwrap();

    store
        .move_records([ID], Partition::Current, Partition::Saved)
        .await
        .unwrap();

    let saved = store.get(ID, Partition::Saved, false).await.unwrap();
    assert!(saved.is_some());
    assert!(store.get(ID, Partition::Current, true).await.unwrap().is_none());
    assert!(store.get(ID, Partition::Current, false).await.unwrap().is_none());
    assert!(store.files().exists(Location::Saved, ID));
    assert!(!store.files().exists(Location::Current, ID));
}

#[tokio::test]
async fn test_delete_removes_record_and_file() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store.add_record(record(ID)).await.unwrap();

    let handle = store.delete([ID], None).unwrap();

    // Gone from the index before the worker runs
    assert!(store.get(ID, Partition::Current, true).await.unwrap().is_none());
    assert!(store.get(ID, Partition::Saved, true).await.unwrap().is_none());

    let report = handle.wait().await.unwrap();
    assert!(report.is_success());
    assert!(!store.files().exists(Location::Current, ID));
}

#[tokio::test]
async fn test_locked_record_fails_only_its_own_item() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    for id in ["1", "2"] {
        store.add_record(record(id)).await.unwrap();
    }

    let held = std::fs::File::open(store.files().path(Location::Current, "1")).unwrap();
    held.lock_exclusive().unwrap();

    // Uncached read under contention resolves to nothing
    assert!(store.get("1", Partition::Current, false).await.unwrap().is_none());

    let report = store
        .move_records(["1", "2"], Partition::Current, Partition::Saved)
        .await
        .unwrap();
    assert_eq!(report.moved, vec!["2"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "1");
    assert_eq!(report.failed[0].1.kind, ErrorKind::LockContention);
    assert_eq!(store.partition_of("1"), Some(Partition::Current));
    assert!(store.files().exists(Location::Current, "1"));
    assert!(!store.files().exists(Location::Saved, "1"));

    let report = store.delete(["1", "2"], None).unwrap().wait().await.unwrap();
    assert_eq!(report.completed, vec!["2"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "1");
    assert_eq!(report.failed[0].1.kind, ErrorKind::LockContention);

    FileExt::unlock(&held).unwrap();
    assert!(store.files().exists(Location::Current, "1"));
}

#[tokio::test]
async fn test_escaping_id_stays_inside_root() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("store")).await;

    let bytes = XmlRecordCodec.write(&record("../../escaped")).unwrap();
    assert!(!store.submit("../../escaped", bytes).await.unwrap());

    assert!(!dir.path().join("escaped.xml").exists());
    assert!(store.ids(Partition::Current).is_empty());
    assert!(store.load_all().await.unwrap().current.is_empty());
}

#[tokio::test]
async fn test_prune_stale_current_records() {
    let dir = TempDir::new().unwrap();
    {
        let writer = open(dir.path()).await;
        writer.add_record(record("1")).await.unwrap();
        writer.add_record(record("2")).await.unwrap();
        writer
            .move_records(["2"], Partition::Current, Partition::Saved)
            .await
            .unwrap();
    }

    let store = TransactionStore::new(StoreConfig::new(dir.path()), XmlRecordCodec)
        .with_watermark(Utc::now() + Duration::hours(1));
    store.initialize().await.unwrap();

    let ids = store.load_all().await.unwrap();
    assert!(ids.current.is_empty());
    // Saved records are never pruned
    assert_eq!(ids.saved, vec!["2"]);

    store.flush().await.unwrap();
    assert!(!store.files().exists(Location::Current, "1"));
    assert!(store.files().exists(Location::Saved, "2"));
}

#[tokio::test]
async fn test_prune_boundary_is_inclusive() {
    let dir = TempDir::new().unwrap();
    let writer = open(dir.path()).await;
    writer.add_record(record(ID)).await.unwrap();

    let modified: DateTime<Utc> = std::fs::metadata(writer.files().path(Location::Current, ID))
        .unwrap()
        .modified()
        .unwrap()
        .into();

    let at_watermark = TransactionStore::new(StoreConfig::new(dir.path()), XmlRecordCodec)
        .with_watermark(modified);
    at_watermark.initialize().await.unwrap();
    assert_eq!(at_watermark.load_all().await.unwrap().current, vec![ID]);

    let after = TransactionStore::new(StoreConfig::new(dir.path()), XmlRecordCodec)
        .with_watermark(modified + Duration::milliseconds(1));
    after.initialize().await.unwrap();
    assert!(after.load_all().await.unwrap().current.is_empty());

    after.flush().await.unwrap();
    assert!(!after.files().exists(Location::Current, ID));
}

#[tokio::test]
async fn test_load_skips_malformed_files() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store.add_record(record("1")).await.unwrap();
    std::fs::write(store.files().path(Location::Current, "2"), b"<transaction id=").unwrap();

    let ids = store.load_all().await.unwrap();
    assert_eq!(ids.current, vec!["1"]);
}

#[tokio::test]
async fn test_clear_saved_twice() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    for id in ["1", "2", "3", "4"] {
        store.add_record(record(id)).await.unwrap();
    }
    store
        .move_records(["1", "2", "3", "4"], Partition::Current, Partition::Saved)
        .await
        .unwrap();

    let sink = Arc::new(Percentages::default());
    let handle = store
        .clear_partition(Partition::Saved, Some(sink.clone() as Arc<dyn ProgressSink>))
        .unwrap();
    assert_eq!(handle.total(), 4);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.completed.len(), 4);
    assert!(report.is_success());
    assert_eq!(*sink.0.lock(), vec![0, 25, 50, 75, 100]);
    assert!(store.ids(Partition::Saved).is_empty());

    let second = store
        .clear_partition(Partition::Saved, None)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_storage_unavailable_when_root_is_a_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    std::fs::write(&root, b"not a directory").unwrap();

    let store = TransactionStore::new(StoreConfig::new(&root), XmlRecordCodec);
    let err = store.initialize().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageUnavailable);

    let err = store.load_all().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageUnavailable);

    // Recovers once the root is usable
    std::fs::remove_file(&root).unwrap();
    store.initialize().await.unwrap();
    assert!(store.load_all().await.unwrap().current.is_empty());
}
