use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct LabelId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PropertyKeyId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropertyKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LabelId {
    fn from(value: u64) -> Self {
        LabelId(value)
    }
}

impl From<u64> for PropertyKeyId {
    fn from(value: u64) -> Self {
        PropertyKeyId(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// Subset of property values usable as index keys.
///
/// Floats and byte blobs have no total equality and are skipped by index
/// writers rather than indexed.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum IndexableValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl From<&PropertyValue> for Option<IndexableValue> {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Bool(b) => Some(IndexableValue::Bool(*b)),
            PropertyValue::Int(i) => Some(IndexableValue::Int(*i)),
            PropertyValue::String(s) => Some(IndexableValue::String(s.clone())),
            PropertyValue::Float(_) | PropertyValue::Bytes(_) => None,
        }
    }
}

impl fmt::Display for IndexableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexableValue::Bool(b) => write!(f, "{b}"),
            IndexableValue::Int(i) => write!(f, "{i}"),
            IndexableValue::String(s) => write!(f, "'{s}'"),
        }
    }
}
