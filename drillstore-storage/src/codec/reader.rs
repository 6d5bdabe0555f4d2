//! # Channel Data Reader
//!
//! Forward-only cursor over parsed channel data rows.
//!
//! ```text
//!  ordinal:   0        1 (composite only)   arity ..  arity + channels - 1
//!           ┌────────┬──────────────────┬──────────┬─────────┐
//!  row:     │ index  │ secondary index  │ channel  │   ...   │
//!           └────────┴──────────────────┴──────────┴─────────┘
//! ```
//!
//! Two input shapes are accepted: delimited data lines (`15,15.1,`, an empty
//! field is a null channel) and JSON rows, either flat (`[15, 15.1, null]`) or
//! two-level (`[[15], [15.1, null]]`, required for composite indices).

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use drillstore_core::{
    error::{Error, Result},
    IndexKind, IndexValue,
};

use super::row::{ChannelRow, ChannelValue};
use super::writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    BeforeStart,
    At(usize),
    Exhausted,
}

/// Cursor over a parsed set of channel data rows
#[derive(Debug, Clone)]
pub struct ChannelDataReader {
    rows: Vec<ChannelRow>,
    index_mnemonics: Vec<String>,
    mnemonics: Vec<String>,
    units: Vec<String>,
    index_kind: IndexKind,
    cursor: Cursor,
}

impl ChannelDataReader {
    /// Build a reader over already-typed rows, validating their shape
    pub fn from_rows(
        rows: Vec<ChannelRow>,
        index_mnemonics: Option<Vec<String>>,
        mnemonics: Option<Vec<String>>,
    ) -> Result<Self> {
        let index_count = match rows.first() {
            Some(row) => row.indices.len(),
            None => index_mnemonics.as_ref().map_or(1, |m| m.len()),
        };
        if !(1..=2).contains(&index_count) {
            return Err(Error::format(0, format!("unsupported index count {}", index_count)));
        }

        let channel_count = match (&mnemonics, rows.first()) {
            (Some(m), _) => m.len(),
            (None, Some(row)) => row.values.len(),
            (None, None) => 0,
        };

        let index_kind = rows.first().map_or(IndexKind::Depth, |r| r.primary().kind());
        let secondary_kind = rows.first().and_then(|r| r.indices.get(1)).map(|i| i.kind());

        for (i, row) in rows.iter().enumerate() {
            if row.indices.len() != index_count {
                return Err(Error::format(
                    i,
                    format!("expected {} index values, found {}", index_count, row.indices.len()),
                ));
            }
            if row.values.len() != channel_count {
                return Err(Error::format(
                    i,
                    format!("expected {} channel values, found {}", channel_count, row.values.len()),
                ));
            }
            if row.primary().kind() != index_kind {
                return Err(Error::format(i, "mixed depth and time primary index values"));
            }
            if row.indices.get(1).map(|v| v.kind()) != secondary_kind {
                return Err(Error::format(i, "mixed secondary index kinds"));
            }
        }

        let index_mnemonics = match index_mnemonics {
            Some(m) if m.len() == index_count => m,
            Some(m) => {
                return Err(Error::format(
                    0,
                    format!("{} index mnemonics for {} index values", m.len(), index_count),
                ))
            }
            None => default_index_mnemonics(index_count),
        };
        let mnemonics =
            mnemonics.unwrap_or_else(|| (1..=channel_count).map(|i| format!("channel_{}", i)).collect());

        let units = vec![String::new(); mnemonics.len()];

        Ok(Self {
            rows,
            index_mnemonics,
            mnemonics,
            units,
            index_kind,
            cursor: Cursor::BeforeStart,
        })
    }

    /// Parse delimited data lines. The first `index_count` fields of each line
    /// are index values.
    pub fn parse_delimited<S: AsRef<str>>(
        lines: &[S],
        index_count: usize,
        mnemonics: Option<&[String]>,
    ) -> Result<Self> {
        if !(1..=2).contains(&index_count) {
            return Err(Error::format(0, format!("unsupported index count {}", index_count)));
        }

        let mut rows = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                return Err(Error::format(i, "empty row"));
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < index_count {
                return Err(Error::format(i, "row has fewer fields than index values"));
            }

            let indices = fields[..index_count]
                .iter()
                .map(|f| parse_index_field(f, i))
                .collect::<Result<Vec<_>>>()?;
            let values = fields[index_count..]
                .iter()
                .map(|f| {
                    if f.is_empty() {
                        None
                    } else {
                        Some(ChannelValue::parse_field(f))
                    }
                })
                .collect();
            rows.push(ChannelRow { indices, values });
        }

        Self::from_rows(rows, None, mnemonics.map(|m| m.to_vec()))
    }

    /// Parse a JSON array of rows
    pub fn parse_json(raw: &str, mnemonics: Option<&[String]>) -> Result<Self> {
        let parsed: Value = serde_json::from_str(raw).map_err(|e| Error::format(0, e.to_string()))?;
        let records = parsed
            .as_array()
            .ok_or_else(|| Error::format(0, "channel data must be a JSON array of rows"))?;

        let mut rows = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            rows.push(parse_json_row(record, i)?);
        }

        Self::from_rows(rows, None, mnemonics.map(|m| m.to_vec()))
    }

    /// Replace the default index mnemonics
    pub fn with_index_mnemonics(mut self, index_mnemonics: Vec<String>) -> Result<Self> {
        if index_mnemonics.len() != self.index_count() {
            return Err(Error::format(0, "index mnemonic count does not match index count"));
        }
        self.index_mnemonics = index_mnemonics;
        Ok(self)
    }

    /// Attach channel units, one per mnemonic
    pub fn with_units(mut self, units: Vec<String>) -> Result<Self> {
        if units.len() != self.channel_count() {
            return Err(Error::format(0, "unit count does not match channel count"));
        }
        self.units = units;
        Ok(self)
    }

    /// Number of index values per row (1 = simple, 2 = composite)
    pub fn index_count(&self) -> usize {
        self.index_mnemonics.len()
    }

    pub fn channel_count(&self) -> usize {
        self.mnemonics.len()
    }

    /// Index plus channel columns
    pub fn field_count(&self) -> usize {
        self.index_count() + self.channel_count()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn index_kind(&self) -> IndexKind {
        self.index_kind
    }

    pub fn index_mnemonics(&self) -> &[String] {
        &self.index_mnemonics
    }

    /// Channel mnemonics in declared order
    pub fn mnemonics(&self) -> &[String] {
        &self.mnemonics
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn rows(&self) -> &[ChannelRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ChannelRow> {
        self.rows
    }

    /// Ordinal of an index or channel mnemonic
    pub fn get_ordinal(&self, mnemonic: &str) -> Option<usize> {
        self.index_mnemonics
            .iter()
            .chain(self.mnemonics.iter())
            .position(|m| m.eq_ignore_ascii_case(mnemonic))
    }

    /// Advance to the next row. Once this returns false the reader stays exhausted.
    pub fn read(&mut self) -> bool {
        self.cursor = match self.cursor {
            Cursor::BeforeStart if !self.rows.is_empty() => Cursor::At(0),
            Cursor::At(i) if i + 1 < self.rows.len() => Cursor::At(i + 1),
            _ => Cursor::Exhausted,
        };
        matches!(self.cursor, Cursor::At(_))
    }

    fn current(&self) -> Result<&ChannelRow> {
        match self.cursor {
            Cursor::At(i) => Ok(&self.rows[i]),
            _ => Err(Error::invalid_operation("reader is not positioned on a row")),
        }
    }

    fn check_ordinal(&self, ordinal: usize) -> Result<()> {
        if ordinal >= self.field_count() {
            return Err(Error::invalid_operation(format!(
                "ordinal {} out of range ({} fields)",
                ordinal,
                self.field_count()
            )));
        }
        Ok(())
    }

    /// Value at `ordinal` in the current row; `None` for a null channel
    pub fn get_value(&self, ordinal: usize) -> Result<Option<ChannelValue>> {
        self.check_ordinal(ordinal)?;
        let row = self.current()?;
        let arity = self.index_count();
        if ordinal < arity {
            Ok(Some(row.indices[ordinal].clone().into()))
        } else {
            Ok(row.values[ordinal - arity].clone())
        }
    }

    pub fn get_double(&self, ordinal: usize) -> Result<Option<f64>> {
        match self.get_value(ordinal)? {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| Error::invalid_operation(format!("field {} is not numeric", ordinal))),
        }
    }

    pub fn get_date_time_offset(&self, ordinal: usize) -> Result<Option<DateTime<FixedOffset>>> {
        match self.get_value(ordinal)? {
            None => Ok(None),
            Some(v) => v
                .as_datetime()
                .map(Some)
                .ok_or_else(|| Error::invalid_operation(format!("field {} is not a date-time", ordinal))),
        }
    }

    pub fn get_string(&self, ordinal: usize) -> Result<Option<String>> {
        Ok(self.get_value(ordinal)?.map(|v| v.to_string()))
    }

    /// Overwrite a field of the current row
    pub fn set_value(&mut self, ordinal: usize, value: Option<ChannelValue>) -> Result<()> {
        self.check_ordinal(ordinal)?;
        let i = match self.cursor {
            Cursor::At(i) => i,
            _ => return Err(Error::invalid_operation("reader is not positioned on a row")),
        };
        let arity = self.index_count();
        let row = &mut self.rows[i];

        if ordinal < arity {
            let current_kind = row.indices[ordinal].kind();
            let index = match (current_kind, value) {
                (IndexKind::Depth, Some(v)) => v.as_f64().map(IndexValue::Depth),
                (IndexKind::Time, Some(v)) => v.as_datetime().map(IndexValue::Time),
                (_, None) => None,
            }
            .ok_or_else(|| Error::format(i, "index value must match the index kind"))?;
            row.indices[ordinal] = index;
        } else {
            row.values[ordinal - arity] = value;
        }
        Ok(())
    }

    /// First and last primary index of the whole row set
    pub fn index_range(&self) -> Option<(IndexValue, IndexValue)> {
        let first = self.rows.first()?;
        let last = self.rows.last()?;
        Some((first.primary().clone(), last.primary().clone()))
    }

    /// Min and max primary index over rows where the channel at `ordinal` is non-null.
    /// A channel with a single value yields `start == end`.
    pub fn get_channel_index_range(&self, ordinal: usize) -> Result<Option<(IndexValue, IndexValue)>> {
        self.check_ordinal(ordinal)?;
        let arity = self.index_count();
        if ordinal < arity {
            return Ok(self.index_range());
        }

        let column = ordinal - arity;
        let mut range: Option<(&IndexValue, &IndexValue)> = None;
        for row in &self.rows {
            if row.values[column].is_none() {
                continue;
            }
            let index = row.primary();
            range = Some(match range {
                None => (index, index),
                Some((lo, hi)) => (
                    if index.key() < lo.key() { index } else { lo },
                    if index.key() > hi.key() { index } else { hi },
                ),
            });
        }
        Ok(range.map(|(lo, hi)| (lo.clone(), hi.clone())))
    }

    /// JSON for the current row, or `None` when not positioned on a row
    pub fn get_json(&self) -> Option<String> {
        let row = self.current().ok()?;
        Some(writer::row_to_json(row).to_string())
    }
}

fn default_index_mnemonics(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| if i == 0 { "index".to_string() } else { format!("index{}", i + 1) })
        .collect()
}

fn parse_index_field(field: &str, row: usize) -> Result<IndexValue> {
    if field.is_empty() {
        return Err(Error::format(row, "index value is empty"));
    }
    if let Ok(depth) = field.parse::<f64>() {
        if depth.is_finite() {
            return Ok(IndexValue::Depth(depth));
        }
    }
    DateTime::parse_from_rfc3339(field)
        .map(IndexValue::Time)
        .map_err(|_| Error::format(row, format!("invalid index value '{}'", field)))
}

fn parse_json_index(value: &Value, row: usize) -> Result<IndexValue> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(IndexValue::Depth)
            .ok_or_else(|| Error::format(row, "index is not representable as a number")),
        Value::String(s) => parse_index_field(s, row),
        _ => Err(Error::format(row, "index must be a number or a date-time string")),
    }
}

fn parse_json_value(value: &Value, row: usize) -> Result<Option<ChannelValue>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64().map(ChannelValue::Double)),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(ChannelValue::Text(s.clone()))),
        Value::Bool(b) => Ok(Some(ChannelValue::Text(b.to_string()))),
        _ => Err(Error::format(row, "channel values must be scalars")),
    }
}

fn parse_json_row(record: &Value, row: usize) -> Result<ChannelRow> {
    let fields = record
        .as_array()
        .ok_or_else(|| Error::format(row, "row must be an array"))?;

    match fields.first() {
        None => Err(Error::format(row, "empty row")),
        // Two-level: [[index, ...], [value, ...]]
        Some(Value::Array(indices)) => {
            if fields.len() != 2 {
                return Err(Error::format(row, "two-level row must hold [indices, values]"));
            }
            let values = fields[1]
                .as_array()
                .ok_or_else(|| Error::format(row, "channel values must be an array"))?;
            if indices.is_empty() {
                return Err(Error::format(row, "row has no index value"));
            }
            Ok(ChannelRow {
                indices: indices
                    .iter()
                    .map(|v| parse_json_index(v, row))
                    .collect::<Result<_>>()?,
                values: values
                    .iter()
                    .map(|v| parse_json_value(v, row))
                    .collect::<Result<_>>()?,
            })
        }
        // Flat: [index, value, ...]
        Some(index) => Ok(ChannelRow {
            indices: vec![parse_json_index(index, row)?],
            values: fields[1..]
                .iter()
                .map(|v| parse_json_value(v, row))
                .collect::<Result<_>>()?,
        }),
    }
}
