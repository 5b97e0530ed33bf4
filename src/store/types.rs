use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Primary key of a row: a partition key plus a secondary (row) key.
///
/// Ordering is lexicographic on `partition_key`, then `row_key`, which is the
/// order scans return rows in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub partition_key: String,
    pub row_key: String,
}

impl RowKey {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}

/// Opaque optimistic-concurrency token handed out by the store.
///
/// Every successful write to a row, by any writer, produces a new token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyToken(pub String);

impl ConcurrencyToken {
    const WILDCARD: &'static str = "*";

    /// Token that matches any current version of an existing row.
    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed property value stored in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int32(i) => write!(f, "{}", i),
            PropertyValue::Int64(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int32(value)
    }
}

/// Named property values of a row.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A row as returned by a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub key: RowKey,
    pub token: ConcurrencyToken,
    /// Store-side timestamp (ms) of the last write. Informational only.
    pub timestamp_ms: u64,
    pub properties: Properties,
}

impl Row {
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(PropertyValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.properties.get(name) {
            Some(PropertyValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.properties.get(name) {
            Some(PropertyValue::Int32(i)) => Some(i64::from(*i)),
            Some(PropertyValue::Int64(i)) => Some(*i),
            _ => None,
        }
    }
}

/// Which rows a scan should return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFilter {
    /// Rows whose partition key lies strictly between `after` and `before`.
    Range { after: String, before: String },
    /// All rows sharing one partition key.
    Partition(String),
}

impl KeyFilter {
    pub fn range(after: impl Into<String>, before: impl Into<String>) -> Self {
        KeyFilter::Range {
            after: after.into(),
            before: before.into(),
        }
    }

    pub fn partition(partition_key: impl Into<String>) -> Self {
        KeyFilter::Partition(partition_key.into())
    }

    pub fn matches(&self, key: &RowKey) -> bool {
        match self {
            KeyFilter::Range { after, before } => {
                key.partition_key.as_str() > after.as_str()
                    && key.partition_key.as_str() < before.as_str()
            }
            KeyFilter::Partition(pk) => &key.partition_key == pk,
        }
    }
}

/// One page of scan results.
///
/// `continuation` is the last key of this page when more rows may follow;
/// pass it back to fetch the next page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPage {
    pub rows: Vec<Row>,
    pub continuation: Option<RowKey>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The supplied token is stale, or the row does not exist.
    #[error("precondition failed for row {0}")]
    PreconditionFailed(RowKey),

    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// True for optimistic-concurrency conflicts, the expected outcome of
    /// losing a write race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed(_))
    }
}

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
