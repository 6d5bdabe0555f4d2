//! # Codec Tests
//!
//! Cursor behaviour of the channel data reader and the wire writers.

use drillstore_core::{error::Error, IndexKind, IndexValue};
use drillstore_storage::codec::{rows_to_delimited, ChannelDataReader, ChannelValue};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_composite_index_rows() {
    let raw = r#"[
        [[100, "2024-01-15T00:00:00Z"], [1.0, null]],
        [[101, "2024-01-15T00:00:10Z"], [null, 2.0]]
    ]"#;
    let mut reader = ChannelDataReader::parse_json(raw, Some(&names(&["GR", "ROP"]))).unwrap();
    assert_eq!(reader.index_count(), 2);
    assert_eq!(reader.field_count(), 4);
    assert_eq!(reader.index_kind(), IndexKind::Depth);

    assert!(reader.read());
    assert_eq!(reader.get_double(0).unwrap(), Some(100.0));
    assert!(reader.get_date_time_offset(1).unwrap().is_some());
    assert_eq!(reader.get_ordinal("rop"), Some(3));
    assert_eq!(reader.get_value(3).unwrap(), None);
}

#[test]
fn test_cursor_is_forward_only() {
    let mut reader = ChannelDataReader::parse_delimited(&["1,10", "2,20"], 1, None).unwrap();
    assert_eq!(reader.get_json(), None);
    assert!(reader.get_value(0).is_err());

    assert!(reader.read());
    assert!(reader.read());
    assert_eq!(reader.get_json().as_deref(), Some("[[2],[20]]"));
    assert!(!reader.read());
    assert!(!reader.read());
    assert_eq!(reader.get_json(), None);
}

#[test]
fn test_set_value_mutates_current_row() {
    let mut reader = ChannelDataReader::parse_delimited(&["1,10,", "2,20,5"], 1, None).unwrap();
    reader.read();
    reader.set_value(2, Some(ChannelValue::Double(7.5))).unwrap();
    reader.set_value(0, Some(ChannelValue::Double(0.5))).unwrap();
    assert!(reader.set_value(0, Some(ChannelValue::Text("nope".into()))).is_err());
    assert!(reader.set_value(9, None).is_err());

    assert_eq!(reader.rows()[0].indices[0], IndexValue::Depth(0.5));
    assert_eq!(rows_to_delimited(reader.rows()), vec!["0.5,10,7.5", "2,20,5"]);
}

#[test]
fn test_channel_index_range_skips_nulls() {
    let reader = ChannelDataReader::parse_delimited(&["1,,3", "2,5,", "3,,4"], 1, Some(&names(&["A", "B"]))).unwrap();

    let (start, end) = reader.get_channel_index_range(1).unwrap().unwrap();
    assert_eq!((start, end), (IndexValue::Depth(2.0), IndexValue::Depth(2.0)));

    let (start, end) = reader.get_channel_index_range(2).unwrap().unwrap();
    assert_eq!((start, end), (IndexValue::Depth(1.0), IndexValue::Depth(3.0)));

    let empty = ChannelDataReader::parse_delimited(&["1,,3"], 1, Some(&names(&["A", "B"]))).unwrap();
    assert_eq!(empty.get_channel_index_range(1).unwrap(), None);
}

#[test]
fn test_malformed_input_reports_row() {
    let err = ChannelDataReader::parse_delimited(&["1,2", "x,3"], 1, None).unwrap_err();
    assert!(matches!(err, Error::Format { row: 1, .. }));

    let err = ChannelDataReader::parse_json("[[1, 2], [2, 3, 4]]", None).unwrap_err();
    assert!(matches!(err, Error::Format { row: 1, .. }));

    let err = ChannelDataReader::parse_json(r#"[[1, 2], ["2024-01-15T00:00:00Z", 3]]"#, None).unwrap_err();
    assert!(matches!(err, Error::Format { .. }));
}
