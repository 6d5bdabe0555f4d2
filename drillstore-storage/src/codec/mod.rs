//! # Channel Data Codec
//!
//! Parses and serializes the row-oriented channel data wire format. Has no
//! storage dependency; the chunk store persists what this module produces.

pub mod reader;
pub mod row;
pub mod writer;

pub use reader::ChannelDataReader;
pub use row::{check_duplicate_indices, compare_rows, union_mnemonics, ChannelRow, ChannelValue};
pub use writer::{row_to_delimited, row_to_json, rows_to_delimited, rows_to_json};
