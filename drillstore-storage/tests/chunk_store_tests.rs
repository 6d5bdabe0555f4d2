//! # Chunk Store Tests
//!
//! Partitioning, merge, split and delete behaviour of channel data chunks,
//! exercised through the log data store.

use drillstore_core::{error::Error, utils::bucket_start, Config, DataQuery, EtpUri, IndexRange, IndexValue, ObjectHeader};
use drillstore_storage::{ChannelDataReader, ChannelRow, ChannelValue, LogDataStore};

fn log_uri() -> EtpUri {
    EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn store_with(config: Config) -> LogDataStore {
    let store = LogDataStore::new(config).unwrap();
    store.add_object(ObjectHeader::new(log_uri(), "Log 1")).unwrap();
    store
}

fn store() -> LogDataStore {
    store_with(Config::default())
}

/// Two channels per row: GR = key + 0.1, ROP = key * 2
fn depth_rows(keys: impl IntoIterator<Item = f64>) -> ChannelDataReader {
    let rows = keys
        .into_iter()
        .map(|k| ChannelRow::depth(k, vec![Some(k + 0.1), Some(k * 2.0)]))
        .collect();
    ChannelDataReader::from_rows(rows, Some(names(&["DEPTH"])), Some(names(&["GR", "ROP"]))).unwrap()
}

fn ranges(store: &LogDataStore) -> Vec<(f64, f64)> {
    store
        .chunk_store()
        .get_chunks(&log_uri())
        .unwrap()
        .iter()
        .map(|c| (c.start_index, c.end_index))
        .collect()
}

#[test]
fn test_append_scenario() {
    let store = store();
    let uri = log_uri();

    store.add_data(&uri, depth_rows((1..=5).map(|i| i as f64 * 100.0))).unwrap();
    assert_eq!(ranges(&store), vec![(100.0, 500.0)]);

    store.update_data(&uri, depth_rows((6..=9).map(|i| i as f64 * 100.0))).unwrap();
    assert_eq!(ranges(&store), vec![(100.0, 900.0)]);

    store.update_data(&uri, depth_rows([1000.0, 1100.0])).unwrap();
    assert_eq!(ranges(&store), vec![(100.0, 900.0), (1000.0, 1100.0)]);
}

#[test]
fn test_identical_update_is_idempotent() {
    let store = store();
    let uri = log_uri();
    let keys: Vec<f64> = (0..50).map(|i| i as f64 * 45.0).collect();

    store.update_data(&uri, depth_rows(keys.clone())).unwrap();
    let before = store.chunk_store().get_chunks(&uri).unwrap();

    let summary = store.update_data(&uri, depth_rows(keys)).unwrap();
    let after = store.chunk_store().get_chunks(&uri).unwrap();

    assert_eq!(before, after);
    assert_eq!(summary.chunks_inserted, 0);
    assert_eq!(summary.chunks_replaced, 0);
    assert_eq!(summary.chunks_unchanged, before.len());
}

#[test]
fn test_chunks_partition_written_indices() {
    let store = store();
    let uri = log_uri();

    // Interleaved batches that land in shared buckets
    let batches: Vec<Vec<f64>> = vec![
        (0..200).map(|i| i as f64 * 7.0).collect(),
        (0..150).map(|i| 3.5 + i as f64 * 13.0).collect(),
        (0..40).map(|i| 2500.0 + i as f64 * 50.0).collect(),
    ];
    let mut written: Vec<f64> = Vec::new();
    for batch in &batches {
        store.update_data(&uri, depth_rows(batch.clone())).unwrap();
        written.extend(batch);
    }
    written.sort_by(|a, b| a.total_cmp(b));
    written.dedup();

    let chunks = store.chunk_store().get_chunks(&uri).unwrap();
    for pair in chunks.windows(2) {
        assert!(pair[0].end_index < pair[1].start_index, "chunks overlap");
    }
    for chunk in &chunks {
        let width = store.config().chunk.depth_range_size;
        assert_eq!(bucket_start(chunk.start_index, width), bucket_start(chunk.end_index, width));
    }

    let stored: Vec<f64> = chunks
        .iter()
        .flat_map(|c| c.rows().unwrap())
        .map(|r| r.key())
        .collect();
    assert_eq!(stored, written);
}

#[test]
fn test_merge_then_split_at_ceiling() {
    let uri = log_uri();
    let keys: Vec<f64> = (0..1000).map(|i| i as f64).collect();

    // Size of the whole bucket as a single chunk
    let reference = store();
    reference.add_data(&uri, depth_rows(keys.clone())).unwrap();
    let whole = reference.chunk_store().get_chunks(&uri).unwrap();
    assert_eq!(whole.len(), 1);
    let full_size = whole[0].document_size().unwrap();

    let mut config = Config::default();
    config.chunk.max_document_size = full_size - 1;
    let store = store_with(config);
    store.add_data(&uri, depth_rows(keys[..500].to_vec())).unwrap();
    assert_eq!(ranges(&store), vec![(0.0, 499.0)]);

    let summary = store.update_data(&uri, depth_rows(keys[500..].to_vec())).unwrap();
    assert_eq!(ranges(&store), vec![(0.0, 499.0), (500.0, 999.0)]);
    assert_eq!(summary.chunks_inserted, 1);
    assert_eq!(summary.chunks_unchanged, 1);

    let chunks = store.chunk_store().get_chunks(&uri).unwrap();
    let rows: Vec<ChannelRow> = chunks.iter().flat_map(|c| c.rows().unwrap()).collect();
    assert_eq!(rows, depth_rows(keys).into_rows());
    assert!(store.metrics().snapshot().chunks_split >= 2);
}

#[test]
fn test_merge_keeps_existing_values_for_null_incoming() {
    let store = store();
    let uri = log_uri();
    store.add_data(&uri, depth_rows([100.0, 200.0])).unwrap();

    let update = ChannelDataReader::parse_delimited(&["200,,9.5"], 1, Some(&names(&["GR", "ROP"]))).unwrap();
    store.update_data(&uri, update).unwrap();

    let rows = store.chunk_store().get_chunks(&uri).unwrap()[0].rows().unwrap();
    assert_eq!(rows[1].values[0], Some(ChannelValue::Double(200.0 + 0.1)));
    assert_eq!(rows[1].values[1], Some(ChannelValue::Double(9.5)));
}

#[test]
fn test_new_channel_widens_chunk() {
    let store = store();
    let uri = log_uri();
    store.add_data(&uri, depth_rows([100.0, 200.0])).unwrap();

    let update = ChannelDataReader::parse_delimited(&["300,42"], 1, Some(&names(&["HKLD"]))).unwrap();
    store.update_data(&uri, update).unwrap();

    let chunks = store.chunk_store().get_chunks(&uri).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].mnemonics, names(&["GR", "ROP", "HKLD"]));
    let rows = chunks[0].rows().unwrap();
    assert_eq!(rows[0].values[2], None);
    assert_eq!(rows[2].values, vec![None, None, Some(ChannelValue::Double(42.0))]);
}

#[test]
fn test_duplicate_index_rejects_whole_write() {
    let store = store();
    let uri = log_uri();
    let mnemonics = names(&["GR", "ROP"]);

    store
        .add_data(&uri, ChannelDataReader::parse_delimited(&["10,1.0,"], 1, Some(&mnemonics)).unwrap())
        .unwrap();
    let before = store.chunk_store().get_chunks(&uri).unwrap();
    let history_before = store.history().len();

    let duplicate = ChannelDataReader::parse_delimited(&["15,15.1,", "15,16.1,"], 1, Some(&mnemonics)).unwrap();
    let err = store.update_data(&uri, duplicate).unwrap_err();
    assert!(matches!(err, Error::DuplicateIndex { .. }));

    assert_eq!(store.chunk_store().get_chunks(&uri).unwrap(), before);
    assert_eq!(store.history().len(), history_before);
}

#[test]
fn test_oversized_row_leaves_state_unchanged() {
    let mut config = Config::default();
    config.chunk.max_document_size = 2048;
    let store = store_with(config);
    let uri = log_uri();

    store.add_data(&uri, depth_rows([100.0, 200.0, 300.0])).unwrap();
    let before = store.chunk_store().get_chunks(&uri).unwrap();

    let rows = vec![
        ChannelRow::depth(1500.0, vec![Some(1.0), Some(2.0)]),
        ChannelRow::new(
            vec![IndexValue::Depth(2500.0)],
            vec![Some(ChannelValue::Text("x".repeat(4000))), None],
        ),
    ];
    let reader = ChannelDataReader::from_rows(rows, None, Some(names(&["GR", "ROP"]))).unwrap();
    let err = store.update_data(&uri, reader).unwrap_err();
    assert!(matches!(err, Error::DocumentTooLarge { limit: 2048, .. }));

    assert_eq!(store.chunk_store().get_chunks(&uri).unwrap(), before);
}

#[test]
fn test_write_over_node_limit_is_rejected() {
    let mut config = Config::default();
    config.limits.max_data_nodes = 10;
    let store = store_with(config);

    let err = store
        .add_data(&log_uri(), depth_rows((0..11).map(|i| i as f64)))
        .unwrap_err();
    assert!(matches!(err, Error::MaxDataExceeded { count: 11, limit: 10 }));
    assert!(store.chunk_store().get_chunks(&log_uri()).unwrap().is_empty());
}

#[test]
fn test_write_to_unknown_object_fails() {
    let store = store();
    let other = log_uri().parent().unwrap().append("log", "missing");
    let err = store.add_data(&other, depth_rows([1.0])).unwrap_err();
    assert!(matches!(err, Error::ParentNotFound { .. }));
}

#[test]
fn test_delete_data_trims_and_removes() {
    let store = store();
    let uri = log_uri();
    store.add_data(&uri, depth_rows((1..=9).map(|i| i as f64 * 100.0))).unwrap();
    store.update_data(&uri, depth_rows([1000.0, 1100.0])).unwrap();

    let summary = store.delete_data(&uri, IndexRange::closed(1000.0, 1100.0), None).unwrap();
    assert_eq!(summary.chunks_deleted, 1);
    assert_eq!(summary.rows_removed, 2);
    assert_eq!(ranges(&store), vec![(100.0, 900.0)]);

    let summary = store.delete_data(&uri, IndexRange::closed(100.0, 300.0), None).unwrap();
    assert_eq!(summary.chunks_updated, 1);
    assert_eq!(summary.rows_removed, 3);
    assert_eq!(ranges(&store), vec![(400.0, 900.0)]);

    // Clearing one channel keeps rows that still hold the other
    let gr = names(&["GR"]);
    let summary = store.delete_data(&uri, IndexRange::all(), Some(&gr)).unwrap();
    assert_eq!(summary.rows_removed, 0);
    let rows = store.chunk_store().get_chunks(&uri).unwrap()[0].rows().unwrap();
    assert!(rows.iter().all(|r| r.values[0].is_none() && r.values[1].is_some()));

    let rop = names(&["ROP"]);
    let summary = store.delete_data(&uri, IndexRange::new(None, Some(5000.0)), Some(&rop)).unwrap();
    assert_eq!(summary.chunks_deleted, 1);
    assert!(store.chunk_store().get_chunks(&uri).unwrap().is_empty());
}

#[test]
fn test_read_projects_and_truncates() {
    let mut config = Config::default();
    config.limits.max_data_points = 2;
    let store = store_with(config);
    let uri = log_uri();
    store.add_data(&uri, depth_rows((1..=9).map(|i| i as f64 * 100.0))).unwrap();
    store.update_data(&uri, depth_rows([1000.0, 1100.0])).unwrap();

    let query = DataQuery {
        range: IndexRange::closed(200.0, 400.0),
        mnemonics: names(&["rop"]),
        ..Default::default()
    };
    let chunks = store.get_data(&uri, &query).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].mnemonics, names(&["ROP"]));
    assert_eq!((chunks[0].start_index, chunks[0].end_index), (200.0, 400.0));

    let page = store.read_data(&uri, &query).unwrap();
    assert!(page.header.is_some());
    assert_eq!(page.mnemonics, names(&["ROP"]));
    assert_eq!(page.rows.len(), 2);
    assert!(page.truncated);
    assert_eq!(page.rows[0].values, vec![Some(ChannelValue::Double(400.0))]);
}

#[test]
fn test_open_range_reads_every_chunk_in_order() {
    let store = store();
    let uri = log_uri();
    store.update_data(&uri, depth_rows([2500.0, 2600.0])).unwrap();
    store.update_data(&uri, depth_rows([100.0, 1100.0])).unwrap();

    let chunks = store.get_data(&uri, &DataQuery::default()).unwrap();
    let starts: Vec<f64> = chunks.iter().map(|c| c.start_index).collect();
    assert_eq!(starts, vec![100.0, 1100.0, 2500.0]);
}

#[test]
fn test_time_indexed_rows_bucket_by_day() {
    let store = store();
    let uri = log_uri();
    let raw = r#"[
        [["2024-01-15T00:00:00Z"], [1.0]],
        [["2024-01-15T12:00:00Z"], [2.0]],
        [["2024-01-16T01:00:00Z"], [3.0]]
    ]"#;
    let reader = ChannelDataReader::parse_json(raw, Some(&names(&["GR"]))).unwrap();
    store.add_data(&uri, reader).unwrap();

    let chunks = store.chunk_store().get_chunks(&uri).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].record_count, 2);
    assert_eq!(
        chunks[1].start().as_datetime().unwrap().to_rfc3339(),
        "2024-01-16T01:00:00+00:00"
    );
}
