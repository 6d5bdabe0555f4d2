//! # Snapshot Tests
//!
//! Saving a store to a directory and reopening it.

use std::fs;

use tempfile::TempDir;

use drillstore_core::{Config, DataQuery, EtpUri, ObjectHeader};
use drillstore_storage::{
    chunk::CHUNK_COLLECTION, snapshot, ChannelDataReader, ChannelRow, LogDataStore,
};

fn log_uri() -> EtpUri {
    EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap()
}

fn populated() -> LogDataStore {
    let store = LogDataStore::new(Config::default()).unwrap();
    store.add_object(ObjectHeader::new(log_uri(), "Log 1")).unwrap();
    let rows = (0..20)
        .map(|i| ChannelRow::depth(i as f64 * 150.0, vec![Some(i as f64), None]))
        .collect();
    let reader =
        ChannelDataReader::from_rows(rows, None, Some(vec!["GR".to_string(), "ROP".to_string()])).unwrap();
    store.add_data(&log_uri(), reader).unwrap();
    store
}

#[test]
fn test_save_and_reopen() {
    let dir = TempDir::new().unwrap();
    let store = populated();
    let manifest = store.save(dir.path()).unwrap();
    assert!(manifest.collections.iter().any(|c| c.name == CHUNK_COLLECTION));

    let reopened = LogDataStore::open(Config::default(), dir.path()).unwrap();
    assert_eq!(
        reopened.chunk_store().get_chunks(&log_uri()).unwrap(),
        store.chunk_store().get_chunks(&log_uri()).unwrap()
    );
    assert_eq!(
        reopened.growing().get_header(&log_uri()).unwrap(),
        store.growing().get_header(&log_uri()).unwrap()
    );
    assert_eq!(reopened.history().len(), store.history().len());

    // Versions survive, so later writes keep counting up
    let chunks = reopened.database().collection(CHUNK_COLLECTION);
    let original = store.database().collection(CHUNK_COLLECTION);
    for key in original.keys() {
        let a = original.get::<drillstore_storage::ChannelDataChunk>(&key).unwrap().unwrap();
        let b = chunks.get::<drillstore_storage::ChannelDataChunk>(&key).unwrap().unwrap();
        assert_eq!(a.version, b.version);
    }

    let page = reopened.read_data(&log_uri(), &DataQuery::default()).unwrap();
    assert_eq!(page.rows.len(), 20);
}

#[test]
fn test_open_without_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    assert!(!snapshot::exists(dir.path()));

    let store = LogDataStore::open(Config::default(), dir.path()).unwrap();
    assert!(store.growing().headers().unwrap().is_empty());
}

#[test]
fn test_unknown_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    populated().save(dir.path()).unwrap();

    let manifest_path = dir.path().join(snapshot::MANIFEST_FILE);
    let text = fs::read_to_string(&manifest_path).unwrap();
    let mut manifest: serde_json::Value = serde_json::from_str(&text).unwrap();
    manifest["format_version"] = serde_json::json!(99);
    fs::write(&manifest_path, manifest.to_string()).unwrap();

    assert!(LogDataStore::open(Config::default(), dir.path()).is_err());
}

#[test]
fn test_interrupted_save_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = populated();
    let manifest = store.save(dir.path()).unwrap();
    assert_eq!(manifest.generation, 1);

    // A save that died after writing one collection file of the next generation
    let partial = dir.path().join(snapshot::collection_file(CHUNK_COLLECTION, 2));
    fs::write(&partial, b"half written").unwrap();

    let reopened = LogDataStore::open(Config::default(), dir.path()).unwrap();
    assert_eq!(
        reopened.chunk_store().get_chunks(&log_uri()).unwrap(),
        store.chunk_store().get_chunks(&log_uri()).unwrap()
    );

    // The next complete save replaces the partial file and drops generation 1
    let manifest = reopened.save(dir.path()).unwrap();
    assert_eq!(manifest.generation, 2);
    assert!(!dir.path().join(snapshot::collection_file(CHUNK_COLLECTION, 1)).exists());
    let page = LogDataStore::open(Config::default(), dir.path())
        .unwrap()
        .read_data(&log_uri(), &DataQuery::default())
        .unwrap();
    assert_eq!(page.rows.len(), 20);
}
