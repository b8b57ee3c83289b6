//! Row mapping
//!
//! Turns result rows into typed values. Scalars read the first column. Shapes start
//! from their default value and take each column whose alias names one of their
//! fields; aliases that name no field are ignored.

use super::convert::FromDbValue;
use super::error::{DatabaseError, Result};
use super::value::{DatabaseRow, DatabaseValue};
use chrono::{FixedOffset, NaiveDateTime};
use uuid::Uuid;

/// Construct a value from one result row
pub trait FromRow: Sized {
    fn from_row(row: &DatabaseRow) -> Result<Self>;
}

/// A record type with named fields
///
/// Entities and projection targets are shapes. Implement it with
/// [`impl_shape!`](crate::impl_shape) or [`impl_entity!`](crate::impl_entity).
pub trait Shape: Default + Send + 'static {
    /// Name used in messages
    fn shape_name() -> &'static str;

    /// Field names in declaration order
    fn field_names() -> &'static [&'static str];

    /// Set `field` from a column value. Returns `false` for an unknown field.
    fn assign(&mut self, field: &str, value: &DatabaseValue) -> Result<bool>;

    /// Current field values in declaration order
    fn to_values(&self) -> Vec<(&'static str, DatabaseValue)>;

    fn has_field(field: &str) -> bool {
        Self::field_names().contains(&field)
    }
}

/// Map a row into a shape by exact alias-to-field match.
pub fn map_shape<S: Shape>(row: &DatabaseRow) -> Result<S> {
    let mut target = S::default();
    for (alias, value) in row.iter() {
        target.assign(alias, value).map_err(|e| {
            DatabaseError::mapping(format!("{}.{}: {}", S::shape_name(), alias, e))
        })?;
    }
    Ok(target)
}

/// Map a row into a scalar from its first column.
///
/// `Null` maps to `None` for optional targets; any other target rejects it.
pub fn map_scalar<T: FromDbValue>(row: &DatabaseRow) -> Result<T> {
    let value = row
        .value_at(0)
        .ok_or_else(|| DatabaseError::mapping("row has no columns"))?;
    if value.is_null() && !T::permits_absence() {
        return Err(DatabaseError::mapping(format!(
            "null in column '{}' cannot map to {}",
            row.column_names().first().map(String::as_str).unwrap_or_default(),
            std::any::type_name::<T>()
        )));
    }
    T::from_db_value(value)
}

macro_rules! impl_scalar_from_row {
    ($($ty:ty),+) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &DatabaseRow) -> Result<Self> {
                    map_scalar(row)
                }
            }

            impl FromRow for Option<$ty> {
                fn from_row(row: &DatabaseRow) -> Result<Self> {
                    map_scalar(row)
                }
            }
        )+
    };
}

impl_scalar_from_row!(bool, i32, i64, f32, f64, String, Vec<u8>, NaiveDateTime, Uuid, FixedOffset);

impl FromRow for DatabaseValue {
    fn from_row(row: &DatabaseRow) -> Result<Self> {
        map_scalar(row)
    }
}

impl FromRow for DatabaseRow {
    fn from_row(row: &DatabaseRow) -> Result<Self> {
        Ok(row.clone())
    }
}

/// Implement [`Shape`] and [`FromRow`] for a struct with named fields.
///
/// Every listed field must implement `FromDbValue` and `ToDbValue`.
///
/// ```rust
/// use entity_query::impl_shape;
///
/// #[derive(Debug, Default)]
/// struct TripSummary {
///     name: String,
///     seats: i32,
/// }
///
/// impl_shape!(TripSummary { name, seats });
/// ```
#[macro_export]
macro_rules! impl_shape {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::core::row_mapper::Shape for $ty {
            fn shape_name() -> &'static str {
                stringify!($ty)
            }

            fn field_names() -> &'static [&'static str] {
                &[$(stringify!($field)),+]
            }

            fn assign(
                &mut self,
                field: &str,
                value: &$crate::core::value::DatabaseValue,
            ) -> $crate::core::error::Result<bool> {
                $(
                    if field == stringify!($field) {
                        self.$field = $crate::core::convert::FromDbValue::from_db_value(value)?;
                        return Ok(true);
                    }
                )+
                Ok(false)
            }

            fn to_values(&self) -> Vec<(&'static str, $crate::core::value::DatabaseValue)> {
                vec![$(
                    (
                        stringify!($field),
                        $crate::core::convert::ToDbValue::to_db_value(&self.$field),
                    )
                ),+]
            }
        }

        impl $crate::core::row_mapper::FromRow for $ty {
            fn from_row(
                row: &$crate::core::value::DatabaseRow,
            ) -> $crate::core::error::Result<Self> {
                $crate::core::row_mapper::map_shape(row)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Fare {
        route: String,
        price: f64,
        discount: Option<f64>,
    }

    crate::impl_shape!(Fare { route, price, discount });

    fn row(pairs: &[(&str, DatabaseValue)]) -> DatabaseRow {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_shape_mapping_by_alias() {
        let mapped: Fare = Fare::from_row(&row(&[
            ("route", "OPO-LIS".into()),
            ("price", DatabaseValue::Double(19.5)),
            ("unrelated", DatabaseValue::Int(1)),
        ]))
        .unwrap();

        assert_eq!(
            mapped,
            Fare {
                route: "OPO-LIS".into(),
                price: 19.5,
                discount: None,
            }
        );
    }

    #[test]
    fn test_shape_null_keeps_zero_value() {
        let mapped = Fare::from_row(&row(&[
            ("route", DatabaseValue::Null),
            ("discount", DatabaseValue::Null),
        ]))
        .unwrap();
        assert_eq!(mapped, Fare::default());
    }

    #[test]
    fn test_shape_error_names_field() {
        let err = Fare::from_row(&row(&[("price", DatabaseValue::Bytes(vec![1]))])).unwrap_err();
        match err {
            DatabaseError::Mapping(message) => assert!(message.starts_with("Fare.price")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_scalar_reads_first_column() {
        let r = row(&[("value", DatabaseValue::Long(12)), ("other", DatabaseValue::Int(1))]);
        assert_eq!(i64::from_row(&r).unwrap(), 12);
        assert_eq!(Option::<i64>::from_row(&r).unwrap(), Some(12));
    }

    #[test]
    fn test_scalar_null_requires_option() {
        let r = row(&[("value", DatabaseValue::Null)]);
        assert!(matches!(i64::from_row(&r), Err(DatabaseError::Mapping(_))));
        assert_eq!(Option::<i64>::from_row(&r).unwrap(), None);
        assert_eq!(DatabaseValue::from_row(&r).unwrap(), DatabaseValue::Null);
    }

    #[test]
    fn test_scalar_empty_row() {
        assert!(i32::from_row(&DatabaseRow::new()).is_err());
    }

    #[test]
    fn test_shape_field_names() {
        assert_eq!(Fare::field_names(), &["route", "price", "discount"]);
        assert!(Fare::has_field("price"));
        assert!(!Fare::has_field("Price"));
        assert_eq!(Fare::default().to_values().len(), 3);
    }
}
