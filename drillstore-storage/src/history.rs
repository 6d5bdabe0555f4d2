//! Append-only change history, one entry per logical operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use drillstore_core::{error::Result, ChangeHistoryEntry, EtpUri};

use crate::document::{Collection, Database};

pub const HISTORY_COLLECTION: &str = "changeHistory";

// Orders entries recorded within the same microsecond
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub struct ChangeHistory {
    db: Arc<Database>,
}

impl ChangeHistory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn collection(&self) -> Arc<Collection> {
        self.db.collection(HISTORY_COLLECTION)
    }

    /// Keys sort by uri, then timestamp, so a prefix scan is already ordered
    fn key(entry: &ChangeHistoryEntry) -> String {
        format!(
            "{}|{:020}|{:012}|{}",
            entry.uri,
            entry.timestamp.timestamp_micros().max(0),
            SEQUENCE.fetch_add(1, Ordering::Relaxed),
            entry.id
        )
    }

    pub fn append(&self, entry: &ChangeHistoryEntry) -> Result<()> {
        self.collection().insert(&Self::key(entry), entry)?;
        debug!(uri = %entry.uri, change = %entry.change_type, "Recorded change");
        Ok(())
    }

    /// Entries for one object, oldest first
    pub fn entries_for(&self, uri: &EtpUri) -> Result<Vec<ChangeHistoryEntry>> {
        let prefix = format!("{}|", uri);
        Ok(self
            .collection()
            .scan_prefix::<ChangeHistoryEntry>(&prefix)?
            .into_iter()
            .map(|v| v.document)
            .collect())
    }

    /// Every entry, oldest first
    pub fn all(&self) -> Result<Vec<ChangeHistoryEntry>> {
        let mut entries: Vec<ChangeHistoryEntry> = self
            .collection()
            .scan_prefix::<ChangeHistoryEntry>("")?
            .into_iter()
            .map(|v| v.document)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.collection().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
