//! Value models.
//!
//! This module defines the values bound to statement placeholders and read back
//! from result sets, together with the SQL type codes used to describe them.

use crate::error::{DbError, DbResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// SQL type of a placeholder or column.
///
/// Codes match the `java.sql.Types` constants so metadata coming from bridged
/// drivers can be mapped without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    Blob,
    Clob,
    Boolean,
    Null,
    Other,
}

impl SqlType {
    /// JDBC type code for this type.
    pub fn code(self) -> i32 {
        match self {
            Self::Bit => -7,
            Self::TinyInt => -6,
            Self::SmallInt => 5,
            Self::Integer => 4,
            Self::BigInt => -5,
            Self::Real => 7,
            Self::Double => 8,
            Self::Decimal => 3,
            Self::Char => 1,
            Self::Varchar => 12,
            Self::LongVarchar => -1,
            Self::Date => 91,
            Self::Time => 92,
            Self::Timestamp => 93,
            Self::Binary => -2,
            Self::VarBinary => -3,
            Self::Blob => 2004,
            Self::Clob => 2005,
            Self::Boolean => 16,
            Self::Null => 0,
            Self::Other => 1111,
        }
    }

    /// Look up a type by its JDBC type code.
    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [SqlType; 21] = [
            SqlType::Bit,
            SqlType::TinyInt,
            SqlType::SmallInt,
            SqlType::Integer,
            SqlType::BigInt,
            SqlType::Real,
            SqlType::Double,
            SqlType::Decimal,
            SqlType::Char,
            SqlType::Varchar,
            SqlType::LongVarchar,
            SqlType::Date,
            SqlType::Time,
            SqlType::Timestamp,
            SqlType::Binary,
            SqlType::VarBinary,
            SqlType::Blob,
            SqlType::Clob,
            SqlType::Boolean,
            SqlType::Null,
            SqlType::Other,
        ];
        ALL.into_iter().find(|t| t.code() == code)
    }

    /// The value kind a column or OUT parameter of this type reads back as.
    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::Bit | Self::Boolean => ValueKind::Bool,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt => ValueKind::Int,
            Self::Real | Self::Double | Self::Decimal => ValueKind::Float,
            Self::Char | Self::Varchar | Self::LongVarchar | Self::Clob => ValueKind::Text,
            Self::Binary | Self::VarBinary | Self::Blob => ValueKind::Bytes,
            Self::Date | Self::Time | Self::Timestamp => ValueKind::Timestamp,
            Self::Null | Self::Other => ValueKind::Any,
        }
    }

    /// Classify a declared column type name, as reported by the database.
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.to_lowercase();

        // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
        if lower.contains("decimal") || lower.contains("numeric") {
            return Self::Decimal;
        }

        if lower == "bool" || lower == "boolean" {
            return Self::Boolean;
        }

        if lower.contains("bigint") || lower == "int8" {
            return Self::BigInt;
        }

        if lower.contains("int") || lower.contains("serial") {
            return Self::Integer;
        }

        if lower.contains("float") || lower.contains("double") || lower == "real" {
            return Self::Double;
        }

        if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
            return Self::Blob;
        }

        if lower.contains("timestamp") || lower.contains("datetime") {
            return Self::Timestamp;
        }

        if lower == "date" {
            return Self::Date;
        }

        if lower.contains("char") || lower.contains("text") || lower.contains("clob") {
            return Self::Varchar;
        }

        if lower == "null" {
            return Self::Null;
        }

        Self::Other
    }
}

/// Coarse runtime kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    /// Accepts any kind; no conversion is attempted.
    Any,
}

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    #[serde(skip_deserializing)]
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Runtime kind of this value. Null reports [`ValueKind::Any`].
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Any,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// Convert to `kind`, allowing only lossless widenings.
    ///
    /// Null converts to every kind.
    pub fn convert_to(self, kind: ValueKind) -> DbResult<Value> {
        match (self, kind) {
            (v, ValueKind::Any) => Ok(v),
            (Value::Null, _) => Ok(Value::Null),
            (v, k) if v.kind() == k => Ok(v),
            (Value::Int(i), ValueKind::Float) => Ok(Value::Float(i as f64)),
            (Value::Int(i), ValueKind::Bool) if i == 0 || i == 1 => Ok(Value::Bool(i == 1)),
            (Value::Bool(b), ValueKind::Int) => Ok(Value::Int(b as i64)),
            (v, k) => Err(DbError::binding(format!(
                "Cannot convert {} value to {:?}",
                v.type_name(),
                k
            ))),
        }
    }

    /// Render as JSON. Bytes become base64 strings, timestamps ISO-8601 strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => {
                use base64::{Engine as _, engine::general_purpose::STANDARD};
                JsonValue::String(STANDARD.encode(b))
            }
            Self::Timestamp(ts) => JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a [`Value`] read out of a result set or OUT parameter.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> DbResult<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> DbResult<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> DbResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

macro_rules! impl_from_value {
    ($t:ty, $kind:ident, $pat:pat => $out:expr) => {
        impl FromValue for $t {
            fn from_value(value: Value) -> DbResult<Self> {
                match value.convert_to(ValueKind::$kind)? {
                    $pat => $out,
                    other => Err(DbError::binding(format!(
                        "Expected {} but found {}",
                        stringify!($t),
                        other.type_name()
                    ))),
                }
            }
        }
    };
}

impl_from_value!(bool, Bool, Value::Bool(b) => Ok(b));
impl_from_value!(i64, Int, Value::Int(i) => Ok(i));
impl_from_value!(f64, Float, Value::Float(f) => Ok(f));
impl_from_value!(String, Text, Value::Text(s) => Ok(s));
impl_from_value!(Vec<u8>, Bytes, Value::Bytes(b) => Ok(b));
impl_from_value!(NaiveDateTime, Timestamp, Value::Timestamp(ts) => Ok(ts));
impl_from_value!(i32, Int, Value::Int(i) => i32::try_from(i)
    .map_err(|_| DbError::binding(format!("Integer {} out of range for i32", i))));

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
