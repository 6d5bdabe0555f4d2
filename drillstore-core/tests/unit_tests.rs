//! Unit tests for drillstore-core

use drillstore_core::{
    config::{GrowingConfig, LogFormat},
    metrics::Metrics,
    utils::bucket_start,
    ChangeHistoryEntry, ChangeType, Config, DataObject, Error, EtpUri, IndexKind, IndexRange,
    IndexValue, ObjectHeader, ReturnElements,
};

mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sections_default_independently() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"growing": {{"timeouts": {{"log": 5}}}}, "logging": {{"format": "json"}}}}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.growing.timeout_for("log").as_secs(), 5);
        assert_eq!(config.growing.timeout_for("trajectory").as_secs(), 60);
        assert_eq!(config.growing.sweep_interval_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.chunk.depth_range_size, 1000.0);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let growing = GrowingConfig {
            sweep_interval_secs: 0,
            ..GrowingConfig::default()
        };
        assert_eq!(growing.sweep_interval().as_secs(), 1);
    }
}

mod uri_tests {
    use super::*;

    #[test]
    fn test_append_and_parent_are_inverse() {
        let wellbore = EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)").unwrap();
        let log = wellbore.append("log", "l9");
        assert_eq!(log.as_str(), "eml://witsml14/well(w1)/wellbore(b1)/log(l9)");
        assert_eq!(log.parent(), Some(wellbore));
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let a = EtpUri::parse("eml://witsml14/well(w1)/").unwrap();
        let b: EtpUri = "eml://witsml14/well(w1)".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_derives_type_and_container() {
        let uri = EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/trajectory(t1)").unwrap();
        let header = ObjectHeader::new(uri, "Survey");
        assert_eq!(header.object_type, "trajectory");
        assert_eq!(
            header.container_id().map(|c| c.as_str()),
            Some("eml://witsml14/well(w1)/wellbore(b1)")
        );
        assert!(!header.object_growing);
    }
}

mod index_tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_bucket_alignment() {
        let width = 1000.0;
        for key in [0.0, 1.5, 999.999, 1000.0, 2500.0, -0.5] {
            let start = bucket_start(key, width);
            assert!(start <= key && key < start + width, "key {} start {}", key, start);
        }
    }

    #[test]
    fn test_time_keys_are_microseconds() {
        let a = DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z").unwrap();
        let b = DateTime::parse_from_rfc3339("2024-01-15T00:00:01Z").unwrap();
        let gap = IndexValue::Time(b).key() - IndexValue::Time(a).key();
        assert_eq!(gap, 1_000_000.0);
        assert_eq!(IndexValue::Time(a).kind(), IndexKind::Time);
    }

    #[test]
    fn test_half_open_ranges() {
        let from = IndexRange::new(Some(10.0), None);
        assert!(from.contains(1e12));
        assert!(!from.contains(9.99));
        assert!(!from.is_open());

        let until = IndexRange::new(None, Some(10.0));
        assert!(until.overlaps(-5.0, 10.0));
        assert!(!until.overlaps(10.5, 20.0));
        assert!(IndexRange::all().is_open());
    }

    #[test]
    fn test_return_elements() {
        assert!(ReturnElements::default().includes_data());
        assert!(ReturnElements::DataOnly.includes_data());
        assert!(!ReturnElements::HeaderOnly.includes_data());
    }
}

mod history_tests {
    use super::*;

    #[test]
    fn test_entry_builders() {
        let uri = EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap();
        let entry = ChangeHistoryEntry::new(uri.clone(), ChangeType::GrowingChanged, "expired")
            .with_growing_state(false)
            .with_range(Some(IndexValue::Depth(1.0)), Some(IndexValue::Depth(2.0)));

        assert_eq!(entry.uri, uri);
        assert_eq!(entry.object_growing_state, Some(false));
        assert_eq!(entry.end_index, Some(IndexValue::Depth(2.0)));
        assert_eq!(entry.change_type.to_string(), "growing-changed");
    }
}

mod metrics_tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = Metrics::new();
        metrics.record_rows_written(10);
        metrics.record_chunk_written();
        metrics.record_chunk_written();
        metrics.record_rollback();
        metrics.record_race();

        let clone = metrics.clone();
        clone.record_commit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_written, 10);
        assert_eq!(snapshot.chunks_written, 2);
        assert_eq!(snapshot.commits, 1);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.races_detected, 1);
        assert_eq!(snapshot.sweeps, 0);
    }
}
