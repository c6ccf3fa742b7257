//! Value codec
//!
//! Converts between raw driver values and typed struct fields. Drivers are not
//! trusted to return the declared SQL type: a `REAL` column may come back as
//! text, an integer as bytes. Every scalar kind therefore accepts its textual
//! form and parses it according to the destination type.
//!
//! A user type becomes a column, rather than an association, by implementing
//! [`ColumnValue`] itself. That is the custom scan/produce capability.

use crate::core::error::{DatabaseError, Result};
use crate::core::value::DatabaseValue;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::any::type_name;

/// How a field type maps onto a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Time,
    Bytes,
    /// Not a column; the field is an association
    None,
}

impl DataKind {
    /// Whether fields of this kind are read and written as columns
    pub fn is_column(self) -> bool {
        self != DataKind::None
    }
}

/// A field type that can be read from and written to a single column.
pub trait ColumnValue: Sized + Send + Sync + 'static {
    /// Column classification of this type
    const KIND: DataKind;

    /// Build a value from the raw driver representation
    fn scan(raw: &DatabaseValue) -> Result<Self>;

    /// Driver representation used for bind parameters
    fn produce(&self) -> DatabaseValue;

    /// Name of the type with any `Option` wrapper removed
    fn base_type_name() -> &'static str {
        type_name::<Self>()
    }
}

/// Classify a field type
pub fn classify<T: ColumnValue>() -> DataKind {
    T::KIND
}

/// Scan `raw` into an existing destination
pub fn scan_into<T: ColumnValue>(raw: &DatabaseValue, dest: &mut T) -> Result<()> {
    *dest = T::scan(raw)?;
    Ok(())
}

/// Driver value for a field
pub fn produce_value<T: ColumnValue>(value: &T) -> DatabaseValue {
    value.produce()
}

fn mismatch<T>(raw: &DatabaseValue) -> DatabaseError {
    DatabaseError::type_mismatch(type_name::<T>(), raw.type_name())
}

fn unparsable<T>(text: &str) -> DatabaseError {
    DatabaseError::type_mismatch(type_name::<T>(), &format!("text {:?}", text))
}

macro_rules! integer_column {
    ($kind:expr => $($ty:ty),*) => {
        $(
            impl ColumnValue for $ty {
                const KIND: DataKind = $kind;

                fn scan(raw: &DatabaseValue) -> Result<Self> {
                    match raw {
                        DatabaseValue::Null => Err(mismatch::<$ty>(raw)),
                        DatabaseValue::Bool(v) => Ok(<$ty>::from(*v)),
                        DatabaseValue::Int(v) => {
                            <$ty>::try_from(*v).map_err(|_| mismatch::<$ty>(raw))
                        }
                        DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => {
                            <$ty>::try_from(*v).map_err(|_| mismatch::<$ty>(raw))
                        }
                        DatabaseValue::Float(_) | DatabaseValue::Double(_) => {
                            Err(mismatch::<$ty>(raw))
                        }
                        DatabaseValue::String(_) | DatabaseValue::Bytes(_) => {
                            let text = raw.to_text().unwrap_or_default();
                            text.trim()
                                .parse::<$ty>()
                                .map_err(|_| unparsable::<$ty>(&text))
                        }
                    }
                }

                fn produce(&self) -> DatabaseValue {
                    DatabaseValue::from(*self)
                }
            }
        )*
    };
}

integer_column!(DataKind::Int => i8, i16, i32, i64);
integer_column!(DataKind::Uint => u8, u16, u32, u64);

macro_rules! float_column {
    ($($ty:ty),*) => {
        $(
            impl ColumnValue for $ty {
                const KIND: DataKind = DataKind::Float;

                fn scan(raw: &DatabaseValue) -> Result<Self> {
                    match raw {
                        DatabaseValue::Null | DatabaseValue::Bool(_) => Err(mismatch::<$ty>(raw)),
                        DatabaseValue::Int(v) => Ok(*v as $ty),
                        DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => Ok(*v as $ty),
                        DatabaseValue::Float(v) => Ok(*v as $ty),
                        DatabaseValue::Double(v) => Ok(*v as $ty),
                        DatabaseValue::String(_) | DatabaseValue::Bytes(_) => {
                            let text = raw.to_text().unwrap_or_default();
                            text.trim()
                                .parse::<$ty>()
                                .map_err(|_| unparsable::<$ty>(&text))
                        }
                    }
                }

                fn produce(&self) -> DatabaseValue {
                    DatabaseValue::from(*self)
                }
            }
        )*
    };
}

float_column!(f32, f64);

impl ColumnValue for bool {
    const KIND: DataKind = DataKind::Bool;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        match raw {
            DatabaseValue::Null => Err(mismatch::<bool>(raw)),
            DatabaseValue::Bytes(_) => {
                let text = raw.to_text().unwrap_or_default();
                DatabaseValue::String(text.trim().to_string())
                    .as_bool()
                    .ok_or_else(|| unparsable::<bool>(&text))
            }
            other => other.as_bool().ok_or_else(|| mismatch::<bool>(raw)),
        }
    }

    fn produce(&self) -> DatabaseValue {
        DatabaseValue::Bool(*self)
    }
}

/// NULL reads as the empty string.
impl ColumnValue for String {
    const KIND: DataKind = DataKind::String;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        Ok(raw.to_text().map(|t| t.into_owned()).unwrap_or_default())
    }

    fn produce(&self) -> DatabaseValue {
        DatabaseValue::String(self.clone())
    }
}

/// NULL reads as an empty buffer.
impl ColumnValue for Vec<u8> {
    const KIND: DataKind = DataKind::Bytes;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        Ok(match raw {
            DatabaseValue::Null => Vec::new(),
            DatabaseValue::Bytes(b) => b.clone(),
            DatabaseValue::String(s) => s.as_bytes().to_vec(),
            other => other.as_string().into_bytes(),
        })
    }

    fn produce(&self) -> DatabaseValue {
        DatabaseValue::Bytes(self.clone())
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Integers are unix seconds, [`DatabaseValue::Timestamp`] is microseconds.
impl ColumnValue for DateTime<Utc> {
    const KIND: DataKind = DataKind::Time;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        let parsed = match raw {
            DatabaseValue::Timestamp(micros) => from_micros(*micros),
            DatabaseValue::Int(secs) => DateTime::from_timestamp(i64::from(*secs), 0),
            DatabaseValue::Long(secs) => DateTime::from_timestamp(*secs, 0),
            DatabaseValue::String(_) | DatabaseValue::Bytes(_) => {
                let text = raw.to_text().unwrap_or_default();
                return parse_naive(&text)
                    .map(|naive| naive.and_utc())
                    .ok_or_else(|| unparsable::<Self>(&text));
            }
            _ => None,
        };
        parsed.ok_or_else(|| mismatch::<Self>(raw))
    }

    fn produce(&self) -> DatabaseValue {
        DatabaseValue::String(self.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

impl ColumnValue for NaiveDateTime {
    const KIND: DataKind = DataKind::Time;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        DateTime::<Utc>::scan(raw).map(|dt| dt.naive_utc())
    }

    fn produce(&self) -> DatabaseValue {
        DatabaseValue::String(self.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

/// Nullable column. NULL scans to `None` instead of failing.
impl<T: ColumnValue> ColumnValue for Option<T> {
    const KIND: DataKind = T::KIND;

    fn scan(raw: &DatabaseValue) -> Result<Self> {
        match raw {
            DatabaseValue::Null => Ok(None),
            other => T::scan(other).map(Some),
        }
    }

    fn produce(&self) -> DatabaseValue {
        match self {
            Some(v) => v.produce(),
            None => DatabaseValue::Null,
        }
    }

    fn base_type_name() -> &'static str {
        T::base_type_name()
    }
}
