//! Serialization of rows back to the wire formats.
//!
//! JSON rows are always written in two-level form (`[[index], [values]]`) with
//! `null` for a missing channel; delimited rows keep an empty field for a missing
//! channel so column alignment is preserved.

use serde_json::Value;

use drillstore_core::IndexValue;

use super::row::ChannelRow;

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Integral doubles are written without a fractional part
pub(crate) fn number_to_json(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn index_to_json(index: &IndexValue) -> Value {
    match index {
        IndexValue::Depth(d) => number_to_json(*d),
        IndexValue::Time(t) => Value::String(t.to_rfc3339()),
    }
}

pub fn row_to_json(row: &ChannelRow) -> Value {
    let indices = row.indices.iter().map(index_to_json).collect();
    let values = row
        .values
        .iter()
        .map(|v| v.as_ref().map_or(Value::Null, |v| v.to_json()))
        .collect();
    Value::Array(vec![Value::Array(indices), Value::Array(values)])
}

/// Serialize rows as a JSON array
pub fn rows_to_json(rows: &[ChannelRow]) -> String {
    Value::Array(rows.iter().map(row_to_json).collect()).to_string()
}

pub fn row_to_delimited(row: &ChannelRow) -> String {
    let mut fields: Vec<String> = row.indices.iter().map(|i| i.to_string()).collect();
    fields.extend(
        row.values
            .iter()
            .map(|v| v.as_ref().map(|v| v.to_string()).unwrap_or_default()),
    );
    fields.join(",")
}

pub fn rows_to_delimited(rows: &[ChannelRow]) -> Vec<String> {
    rows.iter().map(row_to_delimited).collect()
}
