//! Database value types
//!
//! This module defines the driver-level values that travel across the
//! [`Database`](crate::core::Database) boundary: bind parameters going out and
//! raw column values coming back.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Timestamp (Unix timestamp in microseconds)
    Timestamp(i64),
}

impl DatabaseValue {
    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            DatabaseValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int(v) => Some(*v),
            DatabaseValue::Long(v) => i32::try_from(*v).ok(),
            DatabaseValue::Float(v) => Some(*v as i32),
            DatabaseValue::Double(v) => Some(*v as i32),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v as i64),
            DatabaseValue::Float(v) => Some(*v as i64),
            DatabaseValue::Double(v) => Some(*v as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            DatabaseValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a string (zero-copy for String values)
    ///
    /// Returns a string reference without cloning for String values.
    /// For other types, use `as_string()` which performs conversion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a string (with conversion)
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::Null => "null".to_string(),
            DatabaseValue::Bool(v) => v.to_string(),
            DatabaseValue::Int(v) => v.to_string(),
            DatabaseValue::Long(v) => v.to_string(),
            DatabaseValue::Float(v) => v.to_string(),
            DatabaseValue::Double(v) => v.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => format!("<{} bytes>", b.len()),
            DatabaseValue::Timestamp(v) => v.to_string(),
        }
    }

    /// Textual form used when parsing into typed fields.
    ///
    /// Unlike [`as_string`](Self::as_string) this yields `None` for NULL and
    /// decodes bytes as UTF-8, since drivers hand many column types back as
    /// raw byte strings.
    pub fn to_text(&self) -> Option<Cow<'_, str>> {
        match self {
            DatabaseValue::Null => None,
            DatabaseValue::String(s) => Some(Cow::Borrowed(s.as_str())),
            DatabaseValue::Bytes(b) => Some(String::from_utf8_lossy(b)),
            other => Some(Cow::Owned(other.as_string())),
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::Timestamp(_) => "timestamp",
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(v: bool) -> Self {
        DatabaseValue::Bool(v)
    }
}

impl From<i32> for DatabaseValue {
    fn from(v: i32) -> Self {
        DatabaseValue::Int(v)
    }
}

macro_rules! widen_into_long {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(v: $ty) -> Self {
                    DatabaseValue::Long(i64::from(v))
                }
            }
        )*
    };
}

widen_into_long!(i8, i16, u8, u16, u32);

/// Values above `i64::MAX` are carried as text so nothing is silently wrapped.
impl From<u64> for DatabaseValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => DatabaseValue::Long(v),
            Err(_) => DatabaseValue::String(v.to_string()),
        }
    }
}

impl From<usize> for DatabaseValue {
    fn from(v: usize) -> Self {
        DatabaseValue::from(v as u64)
    }
}

impl From<i64> for DatabaseValue {
    fn from(v: i64) -> Self {
        DatabaseValue::Long(v)
    }
}

impl From<f32> for DatabaseValue {
    fn from(v: f32) -> Self {
        DatabaseValue::Float(v)
    }
}

impl From<f64> for DatabaseValue {
    fn from(v: f64) -> Self {
        DatabaseValue::Double(v)
    }
}

impl From<String> for DatabaseValue {
    fn from(v: String) -> Self {
        DatabaseValue::String(v)
    }
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(v: Vec<u8>) -> Self {
        DatabaseValue::Bytes(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A row of database results, column name to value in select-list order
pub type DatabaseRow = IndexMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Number of rows changed by the statement
    pub rows_affected: u64,
    /// Identity generated by an insert, when the driver reports one
    pub last_insert_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let val = DatabaseValue::Int(42);
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_long(), Some(42));
        assert_eq!(val.as_string(), "42");

        let val = DatabaseValue::String("123".to_string());
        assert_eq!(val.as_int(), Some(123));
        assert_eq!(val.as_long(), Some(123));

        let val = DatabaseValue::Bool(true);
        assert_eq!(val.as_bool(), Some(true));
        assert_eq!(val.as_int(), Some(1));
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = 42.into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = "hello".into();
        assert_eq!(val, DatabaseValue::String("hello".to_string()));

        let val: DatabaseValue = true.into();
        assert_eq!(val, DatabaseValue::Bool(true));

        let val: DatabaseValue = Some(42).into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = Option::<i32>::None.into();
        assert_eq!(val, DatabaseValue::Null);
    }

    #[test]
    fn test_to_text() {
        assert_eq!(DatabaseValue::Null.to_text(), None);
        assert_eq!(
            DatabaseValue::Bytes(b"12.5".to_vec()).to_text().as_deref(),
            Some("12.5")
        );
        assert_eq!(DatabaseValue::Long(-7).to_text().as_deref(), Some("-7"));
    }

    #[test]
    fn test_unsigned_widening() {
        assert_eq!(DatabaseValue::from(7u32), DatabaseValue::Long(7));
        assert_eq!(
            DatabaseValue::from(u64::MAX),
            DatabaseValue::String(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_row_keeps_column_order() {
        let mut row = DatabaseRow::new();
        row.insert("b".to_string(), DatabaseValue::Long(1));
        row.insert("a".to_string(), DatabaseValue::Long(2));
        let columns: Vec<_> = row.keys().map(String::as_str).collect();
        assert_eq!(columns, ["b", "a"]);
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(DatabaseValue::Null.type_name(), "null");
        assert_eq!(DatabaseValue::Bool(true).type_name(), "bool");
        assert_eq!(DatabaseValue::Int(42).type_name(), "int");
        assert_eq!(DatabaseValue::Long(42).type_name(), "long");
        assert_eq!(
            DatabaseValue::String("test".to_string()).type_name(),
            "string"
        );
    }
}
