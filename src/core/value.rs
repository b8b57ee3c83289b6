//! Database value types
//!
//! This module defines the values bound as statement parameters and read back
//! from result rows.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database value that can hold different types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    #[default]
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
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// UUID
    Uuid(Uuid),
}

/// Text layout timestamps are stored in when the storage has no native type
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

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
            DatabaseValue::Float(v) => whole(f64::from(*v)).and_then(|v| i32::try_from(v).ok()),
            DatabaseValue::Double(v) => whole(*v).and_then(|v| i32::try_from(v).ok()),
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
            DatabaseValue::Float(v) => whole(f64::from(*v)),
            DatabaseValue::Double(v) => whole(*v),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get the value as an f32
    pub fn as_float(&self) -> Option<f32> {
        match self {
            DatabaseValue::Float(v) => Some(*v),
            DatabaseValue::Double(v) => Some(*v as f32),
            DatabaseValue::Int(v) => Some(*v as f32),
            DatabaseValue::Long(v) => Some(*v as f32),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as f64),
            DatabaseValue::Int(v) => Some(*v as f64),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.parse().ok(),
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
            DatabaseValue::Timestamp(v) => v.format(TIMESTAMP_FORMAT).to_string(),
            DatabaseValue::Uuid(v) => v.hyphenated().to_string(),
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

    /// Get the value as a timestamp
    ///
    /// Text is accepted in the layout the SQLite backend stores timestamps in,
    /// with or without fractional seconds, or as RFC 3339.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            DatabaseValue::Timestamp(v) => Some(*v),
            DatabaseValue::String(s) => NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
                .or_else(|| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.naive_utc())
                }),
            _ => None,
        }
    }

    /// Get the value as a UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            DatabaseValue::Uuid(v) => Some(*v),
            DatabaseValue::String(s) => Uuid::parse_str(s).ok(),
            DatabaseValue::Bytes(b) => Uuid::from_slice(b).ok(),
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
            DatabaseValue::Uuid(_) => "uuid",
        }
    }
}

/// A float with no fractional part, as an i64
fn whole(v: f64) -> Option<i64> {
    (v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64).then_some(v as i64)
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

impl From<NaiveDateTime> for DatabaseValue {
    fn from(v: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(v)
    }
}

impl From<Uuid> for DatabaseValue {
    fn from(v: Uuid) -> Self {
        DatabaseValue::Uuid(v)
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

/// A row of query results
///
/// Columns keep the order the statement selected them in, so values can be read
/// by alias or by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `capacity` columns
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. A repeated alias shadows nothing; lookups return the first.
    pub fn insert(&mut self, column: impl Into<String>, value: DatabaseValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    /// Value of the first column named `column`
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Value at a column position
    pub fn value_at(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in select order
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// `(column, value)` pairs in select order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<DatabaseValue> {
        self.values
    }
}

impl<K: Into<String>> FromIterator<(K, DatabaseValue)> for DatabaseRow {
    fn from_iter<I: IntoIterator<Item = (K, DatabaseValue)>>(iter: I) -> Self {
        let mut row = DatabaseRow::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

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
    fn test_fractional_floats_are_not_integers() {
        assert_eq!(DatabaseValue::Double(3.0).as_long(), Some(3));
        assert_eq!(DatabaseValue::Double(-7.0).as_int(), Some(-7));
        assert_eq!(DatabaseValue::Double(2.5).as_long(), None);
        assert_eq!(DatabaseValue::Float(0.25).as_int(), None);
        assert_eq!(DatabaseValue::Double(f64::NAN).as_long(), None);
        assert_eq!(DatabaseValue::Double(1e12).as_int(), None);
        assert_eq!(DatabaseValue::Double(1e12).as_long(), Some(1_000_000_000_000));
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = 42.into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = "hello".into();
        assert_eq!(val, DatabaseValue::String("hello".to_string()));

        let val: DatabaseValue = Some(42).into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = Option::<i32>::None.into();
        assert_eq!(val, DatabaseValue::Null);
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(8, 30, 0, 250)
            .unwrap();
        let text = DatabaseValue::Timestamp(ts).as_string();
        assert_eq!(text, "2024-03-01 08:30:00.250");
        assert_eq!(DatabaseValue::String(text).as_timestamp(), Some(ts));

        let plain = DatabaseValue::String("2024-03-01 08:30:00".to_string());
        assert_eq!(
            plain.as_timestamp(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 30, 0)
        );
    }

    #[test]
    fn test_uuid_from_text() {
        let id = Uuid::new_v4();
        let val = DatabaseValue::String(id.hyphenated().to_string());
        assert_eq!(val.as_uuid(), Some(id));
        assert_eq!(DatabaseValue::Int(1).as_uuid(), None);
    }

    #[test]
    fn test_row_keeps_order_and_lookup() {
        let mut row = DatabaseRow::new();
        row.insert("Id", DatabaseValue::Long(7));
        row.insert("Name", "Porto".into());

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("Name"), Some(&DatabaseValue::from("Porto")));
        assert_eq!(row.value_at(0), Some(&DatabaseValue::Long(7)));
        assert_eq!(row.column_names(), &["Id".to_string(), "Name".to_string()]);
        assert!(row.get("Missing").is_none());
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(DatabaseValue::Null.type_name(), "null");
        assert_eq!(DatabaseValue::Uuid(Uuid::nil()).type_name(), "uuid");
        assert_eq!(
            DatabaseValue::String("test".to_string()).type_name(),
            "string"
        );
    }
}
