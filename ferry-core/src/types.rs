//! Domain types shared by every ferry crate.
//!
//! All path fields use `PathBuf`; names that cross crate boundaries are
//! newtypes so a store name can never be passed where a branch is expected.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a sync channel (a replica definition grouping datasets).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(pub String);

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChannelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a versioned store (e.g. `staging`, `production`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreName(pub String);

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StoreName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StoreName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a branch inside a versioned store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(pub String);

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque, totally ordered identifier of a single change-log entry.
///
/// Backends hand these out as fixed-width upper-case hex strings, so
/// lexicographic order is log order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceKey(pub String);

impl SequenceKey {
    /// Width of the hex rendering used by [`SequenceKey::from_counter`].
    pub const WIDTH: usize = 20;

    pub fn from_counter(n: u64) -> Self {
        Self(format!("{n:0width$X}", width = Self::WIDTH))
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SequenceKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

/// A single column value as carried by the change log and the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Primary-key equality: integers and floats compare numerically, text
    /// compares exactly, and `Null` never matches anything.
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64().partial_cmp(&other.as_f64()) == Some(Ordering::Equal)
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Column name → value. Ordered so serialized rows are deterministic.
pub type Row = BTreeMap<String, Value>;

/// Point geometry built from a dataset's x/y fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Everything written to a target row: attributes plus optional geometry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowImage {
    pub values: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Point>,
}

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// One row-level delta read from the change log. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Raw CDC operation code (1 = delete, 2 = insert, 4 = update, others ignored).
    pub operation_code: i32,
    pub sequence_key: SequenceKey,
    pub columns: Row,
    /// Log table the record was read from.
    pub source_table: String,
}

impl ChangeRecord {
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.columns.get(field)
    }
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// The pair of source-log columns used to build point geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialFields {
    pub x: String,
    pub y: String,
}

/// One logical table pairing: a change log feeding a target table.
///
/// Built by [`crate::registry`] from configuration plus persisted run state;
/// `last_watermark` is the only field that changes between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub log_function: String,
    pub log_table: String,
    pub log_primary_key: String,
    pub target_table: String,
    pub target_primary_key: String,
    pub spatial: Option<SpatialFields>,
    pub last_watermark: DateTime<Utc>,
}

impl Dataset {
    /// Stable identifier used as the key in run state.
    pub fn key(&self) -> &str {
        &self.log_table
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.log_table, self.target_table)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
