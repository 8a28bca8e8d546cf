//! Dynamically typed values carried by structured log entries.
//!
//! `Value` mirrors the shapes a caller can hand to the agent handler: scalars,
//! nested maps and sequences, plus the two non-portable types the collector
//! cannot store natively (document identifiers and timestamps). Maps are kept
//! in a `BTreeMap` so payloads serialise deterministically.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, Timelike};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Key/value map used for structured entries and flattened records.
pub type Map = BTreeMap<String, Value>;

/// A 12-byte document identifier, rendered as 24 lowercase hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    ObjectId(ObjectId),
    DateTime(DateTime<FixedOffset>),
    List(Vec<Value>),
    Map(Map),
}

impl Value {
    /// Whether the value is a map or a sequence.
    pub fn is_complex(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Whether the value is a map or a sequence without elements.
    pub fn is_empty_complex(&self) -> bool {
        match self {
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Whether the value has a representation on the wire without coercion.
    pub fn is_portable(&self) -> bool {
        !matches!(self, Value::ObjectId(_) | Value::DateTime(_))
    }

    /// Truthiness in the loose sense used for optional payload fields.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::ObjectId(_) | Value::DateTime(_) => true,
        }
    }

    /// Interpret the value as whole epoch seconds, truncating fractions.
    pub fn as_epoch_seconds(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
            }
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S%:z").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::ObjectId(oid) => write!(f, "{oid}"),
            Value::DateTime(dt) => f.write_str(&format_datetime(dt)),
            Value::List(_) | Value::Map(_) => {
                let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::ObjectId(oid) => serializer.serialize_str(&oid.to_hex()),
            Value::DateTime(dt) => serializer.serialize_str(&format_datetime(dt)),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => Str,
    &str => Str,
    ObjectId => ObjectId,
    DateTime<FixedOffset> => DateTime,
    Vec<Value> => List,
    Map => Map,
);

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or_else(|| Value::Str(n.to_string())),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
