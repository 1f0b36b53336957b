//! Cache record model for persisted upstream responses
//!
//! This module contains the payload value model used for cached market
//! responses and the timestamped record wrapper that is persisted to disk.
//! The binary encoding of both lives in the `codec` submodule.

pub mod codec;

pub use codec::{decode_record, encode_record, CorruptRecordError, EncodeError};

/// A single payload value as stored in a cache record
///
/// Upstream responses are JSON-shaped, so the variants mirror the JSON data
/// model plus a raw `Bytes` variant for bodies that are not valid UTF-8.
/// Maps keep their entries in insertion order, and equality compares floats
/// by bit pattern, so a decoded value always compares equal to the value
/// that was encoded (NaN included).
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE-754 double
    Float(f64),
    /// Raw bytes (response bodies that are not UTF-8 text)
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
    /// Ordered list of values
    List(Vec<Value>),
    /// Mapping of text keys to values, in insertion order
    Map(Vec<(String, Value)>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Converts a parsed JSON document into a payload value
    ///
    /// Numbers that fit an `i64` become `Int`; anything else (large `u64`
    /// values, fractions) becomes `Float`. Object key order is preserved.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value back into a JSON document
    ///
    /// `Bytes` become a lossy UTF-8 string and non-finite floats become
    /// `null`, since JSON can represent neither directly. Values built by
    /// `from_json` never contain either, so the production render path is
    /// lossless.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bytes(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// The unit of persistence: a payload stamped with the time it was cached
///
/// Records are immutable once written; a refresh always produces a brand
/// new record rather than mutating the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// Seconds since the Unix epoch at which the payload was stored
    pub cached_at: u64,
    /// The cached upstream response
    pub payload: Value,
}

impl CacheRecord {
    /// Creates a record stamped with the given time
    pub fn new(cached_at: u64, payload: Value) -> Self {
        Self { cached_at, payload }
    }
}
