//! Row and value types produced by the channel data codec.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use drillstore_core::{
    error::{Error, Result},
    types::compare_keys,
    IndexValue,
};

/// A single non-null channel value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    Double(f64),
    DateTime(DateTime<FixedOffset>),
    Text(String),
}

impl ChannelValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ChannelValue::Double(d) => Some(*d),
            ChannelValue::Text(s) => s.trim().parse().ok(),
            ChannelValue::DateTime(_) => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            ChannelValue::DateTime(t) => Some(*t),
            ChannelValue::Text(s) => DateTime::parse_from_rfc3339(s.trim()).ok(),
            ChannelValue::Double(_) => None,
        }
    }

    /// Parse a delimited field; numbers become doubles, anything else text
    pub fn parse_field(field: &str) -> ChannelValue {
        match field.parse::<f64>() {
            Ok(d) if d.is_finite() => ChannelValue::Double(d),
            _ => ChannelValue::Text(field.to_string()),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            ChannelValue::Double(d) => super::writer::number_to_json(*d),
            ChannelValue::DateTime(t) => serde_json::Value::String(t.to_rfc3339()),
            ChannelValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Double(d) => write!(f, "{}", d),
            ChannelValue::DateTime(t) => f.write_str(&t.to_rfc3339()),
            ChannelValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        ChannelValue::Double(value)
    }
}

impl From<&str> for ChannelValue {
    fn from(value: &str) -> Self {
        ChannelValue::Text(value.to_string())
    }
}

impl From<IndexValue> for ChannelValue {
    fn from(value: IndexValue) -> Self {
        match value {
            IndexValue::Depth(d) => ChannelValue::Double(d),
            IndexValue::Time(t) => ChannelValue::DateTime(t),
        }
    }
}

/// One row: 1-2 index values followed by channel values in declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub indices: Vec<IndexValue>,
    pub values: Vec<Option<ChannelValue>>,
}

impl ChannelRow {
    pub fn new(indices: Vec<IndexValue>, values: Vec<Option<ChannelValue>>) -> Self {
        Self { indices, values }
    }

    /// Row keyed by a single depth index
    pub fn depth(index: f64, values: Vec<Option<f64>>) -> Self {
        Self {
            indices: vec![IndexValue::Depth(index)],
            values: values.into_iter().map(|v| v.map(ChannelValue::Double)).collect(),
        }
    }

    pub fn primary(&self) -> &IndexValue {
        &self.indices[0]
    }

    /// Ordering key of the primary index
    pub fn key(&self) -> f64 {
        self.indices[0].key()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Overlay `other` onto this row: non-null values in `other` win
    pub fn merge_from(&mut self, other: ChannelRow) {
        if self.values.len() < other.values.len() {
            self.values.resize(other.values.len(), None);
        }
        for (slot, value) in self.values.iter_mut().zip(other.values) {
            if value.is_some() {
                *slot = value;
            }
        }
        self.indices = other.indices;
    }

    /// Reorder this row's channels from `from` mnemonics to `to` mnemonics.
    /// Channels missing from `from` become null.
    pub fn remap(self, from: &[String], to: &[String]) -> ChannelRow {
        if from == to {
            return self;
        }
        let mut values = self.values;
        let remapped = to
            .iter()
            .map(|m| {
                from.iter()
                    .position(|f| f == m)
                    .and_then(|i| values.get_mut(i).and_then(Option::take))
            })
            .collect();
        ChannelRow {
            indices: self.indices,
            values: remapped,
        }
    }
}

/// Compare rows by primary index
pub fn compare_rows(a: &ChannelRow, b: &ChannelRow) -> Ordering {
    compare_keys(a.key(), b.key())
}

/// Single linear scan for adjacent rows sharing a primary index.
/// Rows must already be ordered by primary index.
pub fn check_duplicate_indices(rows: &[ChannelRow]) -> Result<()> {
    for (i, pair) in rows.windows(2).enumerate() {
        if pair[0].key() == pair[1].key() {
            return Err(Error::DuplicateIndex {
                index: pair[1].primary().to_string(),
                row: i + 1,
            });
        }
    }
    Ok(())
}

/// Union of two mnemonic lists, keeping the order of `base`
pub fn union_mnemonics(base: &[String], extra: &[String]) -> Vec<String> {
    let mut merged = base.to_vec();
    for m in extra {
        if !merged.contains(m) {
            merged.push(m.clone());
        }
    }
    merged
}
