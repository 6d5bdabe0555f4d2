//! # Core Types
//!
//! Data structures shared by the codec, the chunk store and the lifecycle manager.
//!
//! ## Index keys
//!
//! Every primary index value maps to an `f64` key: depth indices are used as-is,
//! time indices become microseconds since the Unix epoch. Chunk ranges, bucket
//! alignment and range filters all work on keys.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Timestamp type used throughout the system
pub type Timestamp = DateTime<Utc>;

const URI_SCHEME: &str = "eml://";

/// Object URI, e.g. `eml://witsml14/well(w1)/wellbore(b1)/log(l1)`.
///
/// The container of an object is the URI with its last object segment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EtpUri {
    raw: String,
}

impl EtpUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| invalid("missing eml:// scheme"))?;
        let mut parts = rest.split('/');
        match parts.next() {
            Some(family) if !family.is_empty() => {}
            _ => return Err(invalid("missing schema family")),
        }

        for segment in parts {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if let Some(open) = segment.find('(') {
                if !segment.ends_with(')') || open == 0 {
                    return Err(invalid("malformed object segment"));
                }
            }
        }

        Ok(Self {
            raw: uri.trim_end_matches('/').to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn last_segment(&self) -> Option<&str> {
        let rest = &self.raw[URI_SCHEME.len()..];
        let mut parts = rest.split('/');
        parts.next();
        parts.last()
    }

    /// Type of the addressed object (`log` for `.../log(l1)`)
    pub fn object_type(&self) -> Option<&str> {
        let segment = self.last_segment()?;
        Some(segment.split('(').next().unwrap_or(segment))
    }

    /// Id of the addressed object (`l1` for `.../log(l1)`)
    pub fn object_id(&self) -> Option<&str> {
        let segment = self.last_segment()?;
        let open = segment.find('(')?;
        Some(&segment[open + 1..segment.len() - 1])
    }

    /// URI of the containing object, if any
    pub fn parent(&self) -> Option<EtpUri> {
        self.last_segment()?;
        let cut = self.raw.rfind('/')?;
        let parent = &self.raw[..cut];
        if parent.len() <= URI_SCHEME.len() || !parent[URI_SCHEME.len()..].contains('/') {
            return None;
        }
        Some(EtpUri {
            raw: parent.to_string(),
        })
    }

    /// Append a child segment
    pub fn append(&self, object_type: &str, id: &str) -> EtpUri {
        EtpUri {
            raw: format!("{}/{}({})", self.raw, object_type, id),
        }
    }
}

impl fmt::Display for EtpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for EtpUri {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        EtpUri::parse(&value)
    }
}

impl From<EtpUri> for String {
    fn from(uri: EtpUri) -> Self {
        uri.raw
    }
}

impl std::str::FromStr for EtpUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EtpUri::parse(s)
    }
}

/// Kind of primary index a row set is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Depth,
    Time,
}

/// A single index value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    Depth(f64),
    Time(DateTime<FixedOffset>),
}

impl IndexValue {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexValue::Depth(_) => IndexKind::Depth,
            IndexValue::Time(_) => IndexKind::Time,
        }
    }

    /// Numeric key used for ordering and chunk placement
    pub fn key(&self) -> f64 {
        match self {
            IndexValue::Depth(d) => *d,
            IndexValue::Time(t) => t.timestamp_micros() as f64,
        }
    }

    /// Rebuild an index value of `kind` from its key
    pub fn from_key(kind: IndexKind, key: f64) -> IndexValue {
        match kind {
            IndexKind::Depth => IndexValue::Depth(key),
            IndexKind::Time => {
                let utc = DateTime::<Utc>::from_timestamp_micros(key as i64).unwrap_or_default();
                IndexValue::Time(utc.fixed_offset())
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IndexValue::Depth(d) => Some(*d),
            IndexValue::Time(_) => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            IndexValue::Time(t) => Some(*t),
            IndexValue::Depth(_) => None,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Depth(d) => write!(f, "{}", d),
            IndexValue::Time(t) => f.write_str(&t.to_rfc3339()),
        }
    }
}

/// Total ordering on index keys
pub fn compare_keys(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Optionally open-ended range of index keys, inclusive on both ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl IndexRange {
    pub fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self { start, end }
    }

    pub fn closed(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range with no bounds
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, key: f64) -> bool {
        self.start.map_or(true, |s| key >= s) && self.end.map_or(true, |e| key <= e)
    }

    /// True if `[start, end]` intersects this range
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start.map_or(true, |s| end >= s) && self.end.map_or(true, |e| start <= e)
    }

    /// True if `[start, end]` lies entirely inside this range
    pub fn covers(&self, start: f64, end: f64) -> bool {
        self.contains(start) && self.contains(end)
    }
}

/// What part of an object a query wants back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReturnElements {
    IdOnly,
    HeaderOnly,
    DataOnly,
    #[default]
    All,
}

impl ReturnElements {
    pub fn includes_data(&self) -> bool {
        matches!(self, ReturnElements::DataOnly | ReturnElements::All)
    }
}

/// Parsed read request handed to the data filter builder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataQuery {
    pub range: IndexRange,
    pub return_elements: ReturnElements,
    /// Channel mnemonics to return; empty means all channels
    pub mnemonics: Vec<String>,
}

/// Metadata every stored object carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonMetadata {
    pub name: String,
    pub date_time_creation: Timestamp,
    pub date_time_last_change: Timestamp,
}

impl CommonMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            date_time_creation: now,
            date_time_last_change: now,
        }
    }
}

/// Header of a growing data object (log, channel set, trajectory, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub uri: EtpUri,
    pub object_type: String,
    pub container_uri: Option<EtpUri>,
    pub metadata: CommonMetadata,
    pub object_growing: bool,
}

impl ObjectHeader {
    /// Build a header whose type and container are derived from the URI
    pub fn new(uri: EtpUri, name: impl Into<String>) -> Self {
        let object_type = uri.object_type().unwrap_or_default().to_string();
        let container_uri = uri.parent();
        Self {
            uri,
            object_type,
            container_uri,
            metadata: CommonMetadata::new(name),
            object_growing: false,
        }
    }
}

/// Container (wellbore) activity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub uri: EtpUri,
    pub metadata: CommonMetadata,
    pub is_active: bool,
}

impl ContainerStatus {
    pub fn new(uri: EtpUri, name: impl Into<String>) -> Self {
        Self {
            uri,
            metadata: CommonMetadata::new(name),
            is_active: false,
        }
    }
}

/// Minimal tracking record the expiry sweep reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowingObjectStatus {
    pub uri: EtpUri,
    pub object_type: String,
    pub container_uri: Option<EtpUri>,
    pub last_append: Timestamp,
    pub is_growing: bool,
}

/// Kind of logical operation recorded in the change history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Update,
    Delete,
    DeleteData,
    GrowingChanged,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Add => "add",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
            ChangeType::DeleteData => "delete-data",
            ChangeType::GrowingChanged => "growing-changed",
        };
        f.write_str(name)
    }
}

/// One audit record per logical operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub id: Uuid,
    pub uri: EtpUri,
    pub change_type: ChangeType,
    pub change_info: String,
    pub timestamp: Timestamp,
    pub object_growing_state: Option<bool>,
    pub start_index: Option<IndexValue>,
    pub end_index: Option<IndexValue>,
}

impl ChangeHistoryEntry {
    pub fn new(uri: EtpUri, change_type: ChangeType, change_info: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri,
            change_type,
            change_info: change_info.into(),
            timestamp: Utc::now(),
            object_growing_state: None,
            start_index: None,
            end_index: None,
        }
    }

    pub fn with_growing_state(mut self, growing: bool) -> Self {
        self.object_growing_state = Some(growing);
        self
    }

    pub fn with_range(mut self, start: Option<IndexValue>, end: Option<IndexValue>) -> Self {
        self.start_index = start;
        self.end_index = end;
        self
    }
}
