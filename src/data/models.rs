//! Data models for stored state values and their provenance

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical type tag persisted next to every value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Bytes => "bytes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "null" => Some(ValueType::Null),
            "bool" => Some(ValueType::Bool),
            "int" => Some(ValueType::Int),
            "float" => Some(ValueType::Float),
            "text" => Some(ValueType::Text),
            "bytes" => Some(ValueType::Bytes),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar value held by a state store.
///
/// `Null` is a real stored value: a key explicitly set to `Null` is
/// distinct from a key that does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl StateValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            StateValue::Null => ValueType::Null,
            StateValue::Bool(_) => ValueType::Bool,
            StateValue::Int(_) => ValueType::Int,
            StateValue::Float(_) => ValueType::Float,
            StateValue::Text(_) => ValueType::Text,
            StateValue::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Integer base used by `atomic_increment`.
    ///
    /// Text, bytes and null count as zero; floats truncate toward zero.
    pub fn increment_base(&self) -> i64 {
        match self {
            StateValue::Bool(b) => i64::from(*b),
            StateValue::Int(n) => *n,
            StateValue::Float(f) => f.trunc() as i64,
            StateValue::Null | StateValue::Text(_) | StateValue::Bytes(_) => 0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => f.write_str("null"),
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Int(n) => write!(f, "{}", n),
            StateValue::Float(x) => write!(f, "{}", x),
            StateValue::Text(s) => f.write_str(s),
            StateValue::Bytes(b) => {
                use base64::Engine as _;
                f.write_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(i64::from(value))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<Vec<u8>> for StateValue {
    fn from(value: Vec<u8>) -> Self {
        StateValue::Bytes(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StateValue::Null)
    }
}

/// Full record for one key, including provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: StateValue,
    /// ISO-8601 UTC, set on first write and never changed
    pub created_at: String,
    pub created_by: Option<String>,
    /// ISO-8601 UTC, refreshed on every write
    pub updated_at: String,
    pub updated_by: Option<String>,
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
///
/// Fixed width, so lexicographic order matches chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
