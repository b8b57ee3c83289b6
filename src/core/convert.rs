//! Conversions between Rust values and [`DatabaseValue`]
//!
//! Outgoing values implement [`ToDbValue`]; every parameter then passes through
//! [`bind_value`], which applies the storage normalization rules. Incoming values
//! implement [`FromDbValue`], where a null column yields the type's zero value unless
//! the type can express absence.

use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use chrono::{Datelike, FixedOffset, NaiveDateTime, Offset, Utc};
use uuid::Uuid;

/// Earliest year the storage datetime type accepts
pub const MIN_STORAGE_YEAR: i32 = 1753;
/// Latest year the storage datetime type accepts
pub const MAX_STORAGE_YEAR: i32 = 9999;

/// Conversion into a bindable value
pub trait ToDbValue {
    fn to_db_value(&self) -> DatabaseValue;
}

/// Conversion out of a column value
pub trait FromDbValue: Sized {
    /// Convert a column value. `Null` yields the zero value of the type.
    fn from_db_value(value: &DatabaseValue) -> Result<Self>;

    /// Whether `Null` is a legitimate value of this type rather than a missing one
    fn permits_absence() -> bool {
        false
    }
}

/// Normalize a value before it is bound as a statement parameter.
///
/// Empty byte sequences and timestamps outside the storage range bind as `Null`.
pub fn bind_value(value: DatabaseValue) -> DatabaseValue {
    match value {
        DatabaseValue::Bytes(bytes) if bytes.is_empty() => DatabaseValue::Null,
        DatabaseValue::Timestamp(ts) if !in_storage_range(&ts) => DatabaseValue::Null,
        other => other,
    }
}

fn in_storage_range(ts: &NaiveDateTime) -> bool {
    (MIN_STORAGE_YEAR..=MAX_STORAGE_YEAR).contains(&ts.year())
}

/// Format an offset the way it is stored: `+HH:MM`
pub fn format_offset(offset: &FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

/// Parse a stored `+HH:MM` offset
pub fn parse_offset(text: &str) -> Result<FixedOffset> {
    let invalid = || DatabaseError::type_mismatch("+HH:MM offset", text);
    let text = text.trim();
    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1, &text[1..]),
        Some(b'-') => (-1, &text[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

macro_rules! impl_to_db_value {
    ($($ty:ty),+) => {
        $(
            impl ToDbValue for $ty {
                fn to_db_value(&self) -> DatabaseValue {
                    DatabaseValue::from(self.clone())
                }
            }
        )+
    };
}

impl_to_db_value!(bool, i32, i64, f32, f64, String, Vec<u8>, NaiveDateTime, Uuid);

impl ToDbValue for str {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::String(self.to_string())
    }
}

impl ToDbValue for [u8] {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::Bytes(self.to_vec())
    }
}

impl ToDbValue for i16 {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::Int(i32::from(*self))
    }
}

impl ToDbValue for u8 {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::Int(i32::from(*self))
    }
}

impl ToDbValue for u32 {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::Long(i64::from(*self))
    }
}

impl ToDbValue for FixedOffset {
    fn to_db_value(&self) -> DatabaseValue {
        DatabaseValue::String(format_offset(self))
    }
}

impl ToDbValue for DatabaseValue {
    fn to_db_value(&self) -> DatabaseValue {
        self.clone()
    }
}

impl<T: ToDbValue> ToDbValue for Option<T> {
    fn to_db_value(&self) -> DatabaseValue {
        match self {
            Some(v) => v.to_db_value(),
            None => DatabaseValue::Null,
        }
    }
}

impl<T: ToDbValue + ?Sized> ToDbValue for &T {
    fn to_db_value(&self) -> DatabaseValue {
        (**self).to_db_value()
    }
}

macro_rules! impl_from_db_value {
    ($ty:ty, $expected:literal, $accessor:ident) => {
        impl FromDbValue for $ty {
            fn from_db_value(value: &DatabaseValue) -> Result<Self> {
                if value.is_null() {
                    return Ok(<$ty>::default());
                }
                value
                    .$accessor()
                    .ok_or_else(|| DatabaseError::type_mismatch($expected, value.type_name()))
            }
        }
    };
}

impl_from_db_value!(bool, "bool", as_bool);
impl_from_db_value!(i32, "i32", as_int);
impl_from_db_value!(i64, "i64", as_long);
impl_from_db_value!(f32, "f32", as_float);
impl_from_db_value!(f64, "f64", as_double);
impl_from_db_value!(NaiveDateTime, "timestamp", as_timestamp);
impl_from_db_value!(Uuid, "uuid", as_uuid);

impl FromDbValue for String {
    fn from_db_value(value: &DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Null => Ok(String::new()),
            DatabaseValue::String(s) => Ok(s.clone()),
            DatabaseValue::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| DatabaseError::type_mismatch("string", "bytes")),
            other => Ok(other.as_string()),
        }
    }
}

impl FromDbValue for Vec<u8> {
    fn from_db_value(value: &DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Null => Ok(Vec::new()),
            other => other
                .as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| DatabaseError::type_mismatch("bytes", other.type_name())),
        }
    }
}

impl FromDbValue for FixedOffset {
    fn from_db_value(value: &DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Null => Ok(Utc.fix()),
            DatabaseValue::String(s) => parse_offset(s),
            other => Err(DatabaseError::type_mismatch("offset", other.type_name())),
        }
    }
}

impl FromDbValue for DatabaseValue {
    fn from_db_value(value: &DatabaseValue) -> Result<Self> {
        Ok(value.clone())
    }

    fn permits_absence() -> bool {
        true
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DatabaseValue) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_db_value(value).map(Some)
        }
    }

    fn permits_absence() -> bool {
        true
    }
}

#[doc(hidden)]
pub fn code_matches(value: &DatabaseValue, code: &DatabaseValue) -> bool {
    match code {
        DatabaseValue::String(expected) => value.as_str() == Some(expected.as_str()),
        other => other.as_long().is_some() && value.as_long() == other.as_long(),
    }
}

/// Implement [`ToDbValue`] and [`FromDbValue`] for a fieldless enum stored as a code.
///
/// Codes may be integers or strings. A `Null` column maps to the first listed
/// variant. The enum must be `Copy`.
///
/// ```rust
/// use entity_query::impl_db_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Default)]
/// enum TripStatus {
///     #[default]
///     Scheduled,
///     Departed,
///     Cancelled,
/// }
///
/// impl_db_enum!(TripStatus { Scheduled = 0, Departed = 1, Cancelled = 2 });
/// ```
#[macro_export]
macro_rules! impl_db_enum {
    ($ty:ident { $($variant:ident = $code:expr),+ $(,)? }) => {
        impl $crate::core::convert::ToDbValue for $ty {
            fn to_db_value(&self) -> $crate::core::value::DatabaseValue {
                match self {
                    $($ty::$variant => $crate::core::value::DatabaseValue::from($code),)+
                }
            }
        }

        impl $crate::core::convert::FromDbValue for $ty {
            fn from_db_value(
                value: &$crate::core::value::DatabaseValue,
            ) -> $crate::core::error::Result<Self> {
                let variants = [$(($ty::$variant, $crate::core::value::DatabaseValue::from($code))),+];
                if value.is_null() {
                    return Ok(variants[0].0);
                }
                variants
                    .iter()
                    .find(|(_, code)| $crate::core::convert::code_matches(value, code))
                    .map(|(variant, _)| *variant)
                    .ok_or_else(|| {
                        $crate::core::error::DatabaseError::mapping(format!(
                            "no {} variant for code {}",
                            stringify!($ty),
                            value.as_string()
                        ))
                    })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Seat {
        Window,
        Aisle,
    }

    crate::impl_db_enum!(Seat { Window = 1, Aisle = 2 });

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Currency {
        Euro,
        Dollar,
    }

    crate::impl_db_enum!(Currency { Euro = "EUR", Dollar = "USD" });

    #[test]
    fn test_enum_codes() {
        assert_eq!(Seat::Aisle.to_db_value(), DatabaseValue::Int(2));
        assert_eq!(Seat::from_db_value(&DatabaseValue::Long(1)).unwrap(), Seat::Window);
        assert_eq!(Seat::from_db_value(&DatabaseValue::Null).unwrap(), Seat::Window);
        assert!(matches!(
            Seat::from_db_value(&DatabaseValue::Int(9)),
            Err(DatabaseError::Mapping(_))
        ));

        assert_eq!(Currency::Dollar.to_db_value(), DatabaseValue::from("USD"));
        assert_eq!(
            Currency::from_db_value(&DatabaseValue::from("EUR")).unwrap(),
            Currency::Euro
        );
    }

    #[test]
    fn test_offsets() {
        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!(offset.to_db_value(), DatabaseValue::from("+05:30"));
        let west = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(format_offset(&west), "-03:00");

        assert_eq!(parse_offset("+05:30").unwrap(), offset);
        assert_eq!(parse_offset("-03:00").unwrap(), west);
        assert!(parse_offset("05:30").is_err());
        assert!(parse_offset("+05:75").is_err());
    }

    #[test]
    fn test_bind_normalization() {
        assert_eq!(bind_value(DatabaseValue::Bytes(Vec::new())), DatabaseValue::Null);
        assert_eq!(
            bind_value(DatabaseValue::Bytes(vec![1])),
            DatabaseValue::Bytes(vec![1])
        );

        let ancient = NaiveDate::from_ymd_opt(1600, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(bind_value(ancient.into()), DatabaseValue::Null);

        let modern = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(bind_value(modern.into()), DatabaseValue::Timestamp(modern));
    }

    #[test]
    fn test_null_yields_zero_values() {
        assert_eq!(i32::from_db_value(&DatabaseValue::Null).unwrap(), 0);
        assert_eq!(String::from_db_value(&DatabaseValue::Null).unwrap(), "");
        assert!(!bool::from_db_value(&DatabaseValue::Null).unwrap());
        assert_eq!(Option::<i64>::from_db_value(&DatabaseValue::Null).unwrap(), None);
        assert!(!i64::permits_absence());
        assert!(Option::<i64>::permits_absence());
    }

    #[test]
    fn test_type_mismatch() {
        let err = i32::from_db_value(&DatabaseValue::Bytes(vec![1, 2])).unwrap_err();
        assert!(matches!(err, DatabaseError::TypeMismatch { .. }));
    }

    #[test]
    fn test_integers_reject_fractional_doubles() {
        assert_eq!(i64::from_db_value(&DatabaseValue::Double(3.0)).unwrap(), 3);
        assert!(matches!(
            i64::from_db_value(&DatabaseValue::Double(2.5)),
            Err(DatabaseError::TypeMismatch { expected, actual }) if expected == "i64" && actual == "double"
        ));
        assert!(matches!(
            i32::from_db_value(&DatabaseValue::Double(13.5)),
            Err(DatabaseError::TypeMismatch { .. })
        ));
        assert_eq!(
            Option::<i32>::from_db_value(&DatabaseValue::Double(13.0)).unwrap(),
            Some(13)
        );
    }

    #[test]
    fn test_references_and_options() {
        let name = String::from("Lisbon");
        assert_eq!((&name).to_db_value(), DatabaseValue::from("Lisbon"));
        assert_eq!("x".to_db_value(), DatabaseValue::from("x"));
        assert_eq!(Some(3).to_db_value(), DatabaseValue::Int(3));
        assert_eq!(Option::<i32>::None.to_db_value(), DatabaseValue::Null);
    }
}
