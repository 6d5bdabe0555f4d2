//! Channel data chunk document and read filter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drillstore_core::{
    error::{Error, Result},
    EtpUri, IndexKind, IndexRange, IndexValue,
};

use crate::codec::{rows_to_json, ChannelDataReader, ChannelRow};
use crate::document::encoded_size;

/// Collection holding every chunk of every URI
pub const CHUNK_COLLECTION: &str = "channelDataChunk";

/// Bounded, index-range-partitioned slice of one URI's channel data.
///
/// `start_index` and `end_index` are the keys of the first and last row;
/// `data` holds the rows in two-level JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDataChunk {
    pub id: Uuid,
    pub uri: EtpUri,
    pub index_kind: IndexKind,
    pub start_index: f64,
    pub end_index: f64,
    pub index_mnemonics: Vec<String>,
    pub mnemonics: Vec<String>,
    #[serde(default)]
    pub units: Vec<String>,
    pub record_count: usize,
    pub data: String,
}

impl ChannelDataChunk {
    /// Build a chunk over `rows`, which must be non-empty and ordered by primary index
    pub fn from_rows(
        id: Uuid,
        uri: &EtpUri,
        index_kind: IndexKind,
        index_mnemonics: &[String],
        mnemonics: &[String],
        units: &[String],
        rows: &[ChannelRow],
    ) -> Result<Self> {
        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(Error::Internal {
                    message: format!("empty chunk for {}", uri),
                })
            }
        };

        Ok(Self {
            id,
            uri: uri.clone(),
            index_kind,
            start_index: first.key(),
            end_index: last.key(),
            index_mnemonics: index_mnemonics.to_vec(),
            mnemonics: mnemonics.to_vec(),
            units: units.to_vec(),
            record_count: rows.len(),
            data: rows_to_json(rows),
        })
    }

    /// Document key: chunks of one URI share the `"{uri}|"` prefix
    pub fn key(&self) -> String {
        chunk_key(&self.uri, &self.id)
    }

    pub fn start(&self) -> IndexValue {
        IndexValue::from_key(self.index_kind, self.start_index)
    }

    pub fn end(&self) -> IndexValue {
        IndexValue::from_key(self.index_kind, self.end_index)
    }

    /// Cursor over the stored rows
    pub fn reader(&self) -> Result<ChannelDataReader> {
        let reader = ChannelDataReader::parse_json(&self.data, Some(&self.mnemonics))?
            .with_index_mnemonics(self.index_mnemonics.clone())?;
        if self.units.len() == self.mnemonics.len() {
            reader.with_units(self.units.clone())
        } else {
            Ok(reader)
        }
    }

    pub fn rows(&self) -> Result<Vec<ChannelRow>> {
        Ok(self.reader()?.into_rows())
    }

    /// Encoded size of the chunk as persisted
    pub fn document_size(&self) -> Result<usize> {
        encoded_size(self)
    }

    /// Same stored content, ignoring the id
    pub fn same_content(&self, other: &ChannelDataChunk) -> bool {
        self.start_index == other.start_index
            && self.end_index == other.end_index
            && self.mnemonics == other.mnemonics
            && self.index_mnemonics == other.index_mnemonics
            && self.units == other.units
            && self.data == other.data
    }
}

pub fn chunk_prefix(uri: &EtpUri) -> String {
    format!("{}|", uri)
}

pub fn chunk_key(uri: &EtpUri, id: &Uuid) -> String {
    format!("{}|{}", uri, id)
}

/// Selection of chunks and channels for a read
#[derive(Debug, Clone, PartialEq)]
pub struct DataFilter {
    pub uri: EtpUri,
    /// Requested channels; empty means all
    pub mnemonics: Vec<String>,
    pub range: IndexRange,
    /// Ignore the range and return every chunk
    pub include_all: bool,
}

impl DataFilter {
    /// Whether a chunk spanning `[start, end]` is selected
    pub fn selects(&self, start: f64, end: f64) -> bool {
        self.include_all || self.range.overlaps(start, end)
    }

    /// Whether a row at `key` survives trimming
    pub fn keeps_row(&self, key: f64) -> bool {
        self.include_all || self.range.contains(key)
    }

    /// Requested channels present in `available`, in request order.
    /// `None` means no projection.
    pub fn projection(&self, available: &[String]) -> Option<Vec<String>> {
        if self.mnemonics.is_empty() {
            return None;
        }
        Some(
            self.mnemonics
                .iter()
                .filter_map(|m| available.iter().find(|a| a.eq_ignore_ascii_case(m)).cloned())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> EtpUri {
        EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_chunk_rows_survive_storage_form() {
        let rows = vec![
            ChannelRow::depth(100.0, vec![Some(1.5), None]),
            ChannelRow::depth(200.0, vec![None, Some(2.0)]),
        ];
        let chunk = ChannelDataChunk::from_rows(
            Uuid::new_v4(),
            &uri(),
            IndexKind::Depth,
            &names(&["DEPTH"]),
            &names(&["GR", "ROP"]),
            &names(&["gAPI", "m/h"]),
            &rows,
        )
        .unwrap();

        assert_eq!(chunk.start_index, 100.0);
        assert_eq!(chunk.end_index, 200.0);
        assert_eq!(chunk.record_count, 2);
        assert_eq!(chunk.rows().unwrap(), rows);

        let reader = chunk.reader().unwrap();
        assert_eq!(reader.get_ordinal("ROP"), Some(2));
        assert_eq!(reader.units(), &names(&["gAPI", "m/h"])[..]);
        assert!(chunk.key().starts_with(&chunk_prefix(&uri())));
    }

    #[test]
    fn test_filter_projection_is_case_insensitive() {
        let filter = DataFilter {
            uri: uri(),
            mnemonics: names(&["rop", "MISSING"]),
            range: IndexRange::closed(0.0, 10.0),
            include_all: false,
        };
        assert_eq!(filter.projection(&names(&["GR", "ROP"])), Some(names(&["ROP"])));
        assert!(filter.selects(5.0, 50.0));
        assert!(!filter.selects(11.0, 50.0));
        assert!(!filter.keeps_row(11.0));
    }
}
