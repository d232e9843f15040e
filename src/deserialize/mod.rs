//! Decoded object values.
//!
//! [`Decoder`] walks an allocation's bytes using the registered layout of its
//! type and produces a [`Record`].  Nothing in this module fails: bytes that
//! cannot be interpreted come back as `Value::Null`, `Value::Raw` hex, or a
//! fallback record.

pub mod decoder;

pub use decoder::Decoder;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Field name carrying the hex dump of a fallback record.
pub const RAW_FIELD: &str = "_raw";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    String(String),
    /// 32-bit enum value with the matching constant name, if any.
    Enum { value: i64, name: Option<String> },
    /// Lowercase hex of bytes with no known interpretation.
    Raw(String),
    Array(Vec<Value>),
    Record(Record),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(v) => Some(v),
            Value::Int(v) => u64::try_from(v).ok(),
            Value::Bool(b) => Some(b as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Enum { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Raw(s) => Some(s),
            Value::Enum { name: Some(n), .. } => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

// ── Record ───────────────────────────────────────────────────────────────────

/// An ordered field-name → value mapping.  Field order is the type's
/// byte-offset order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub type_name: Option<String>,
    fields:        Vec<(String, Value)>,
    fallback:      bool,
}

impl Record {
    pub fn new(type_name: Option<String>) -> Self {
        Self { type_name, fields: Vec::new(), fallback: false }
    }

    /// A record for bytes with no usable layout: a single `_raw` field.
    pub fn fallback(type_name: Option<String>, raw_hex: String) -> Self {
        Self {
            type_name,
            fields: vec![(RAW_FIELD.to_owned(), Value::Raw(raw_hex))],
            fallback: true,
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// The hex dump of a fallback record.
    pub fn raw(&self) -> Option<&str> {
        if !self.fallback {
            return None;
        }
        self.get(RAW_FIELD).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
