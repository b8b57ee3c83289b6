//! Entity metadata registry
//!
//! Each entity shape declares the table it lives in, the column behind every
//! field, its key fields and the fields the storage computes. Declarations are
//! collected once into an immutable [`MetadataRegistry`] that the SQL builder
//! consults while compiling queries.

use super::error::{DatabaseError, Result};
use super::row_mapper::{FromRow, Shape};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of a shape, usable as a map key
///
/// Equality and hashing use the type identity only; the name is for messages.
#[derive(Clone, Copy)]
pub struct ShapeId {
    type_id: TypeId,
    name: &'static str,
}

impl ShapeId {
    /// Identity of shape `S`
    pub fn of<S: Shape>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: S::shape_name(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for ShapeId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ShapeId {}

impl Hash for ShapeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One field-to-column mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub field: String,
    pub column: String,
}

/// Storage description of one entity shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    table_name: String,
    columns: Vec<ColumnMapping>,
    key_fields: Vec<String>,
    computed_fields: Vec<String>,
}

impl EntityMetadata {
    /// Start describing an entity stored in `table_name`
    pub fn builder(table_name: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            metadata: EntityMetadata {
                table_name: table_name.into(),
                columns: Vec::new(),
                key_fields: Vec::new(),
                computed_fields: Vec::new(),
            },
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Declared columns in declaration order
    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn computed_fields(&self) -> &[String] {
        &self.computed_fields
    }

    /// Resolve a field reference.
    ///
    /// The exact field name wins; otherwise an exact column name is accepted, which
    /// is how filters arriving from the API boundary name things.
    pub fn column_for(&self, name: &str) -> Option<&ColumnMapping> {
        self.columns
            .iter()
            .find(|c| c.field == name)
            .or_else(|| self.columns.iter().find(|c| c.column == name))
    }

    pub fn is_key(&self, field: &str) -> bool {
        self.key_fields.iter().any(|k| k == field)
    }

    pub fn is_computed(&self, field: &str) -> bool {
        self.computed_fields.iter().any(|c| c == field)
    }

    /// Columns a write may set: every column the storage does not compute
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns.iter().filter(|c| !self.is_computed(&c.field))
    }

    /// Mapping of the first key field, if any
    pub fn primary_key(&self) -> Option<&ColumnMapping> {
        self.key_fields
            .first()
            .and_then(|key| self.columns.iter().find(|c| &c.field == key))
    }

    /// Columns that give a paginated query a deterministic order when the caller
    /// supplied none: every key column, otherwise every declared column
    pub fn fallback_order_columns(&self) -> Vec<&ColumnMapping> {
        let keys: Vec<_> = self
            .key_fields
            .iter()
            .filter_map(|key| self.columns.iter().find(|c| &c.field == key))
            .collect();
        if keys.is_empty() {
            self.columns.iter().collect()
        } else {
            keys
        }
    }

    fn validate(&self, shape: &str) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(DatabaseError::configuration(format!(
                "{shape}: table name is empty"
            )));
        }
        if self.columns.is_empty() {
            return Err(DatabaseError::configuration(format!(
                "{shape}: no columns declared"
            )));
        }

        let mut fields = HashSet::new();
        for mapping in &self.columns {
            if !fields.insert(mapping.field.as_str()) {
                return Err(DatabaseError::configuration(format!(
                    "{shape}: field '{}' declared twice",
                    mapping.field
                )));
            }
        }

        for field in self.key_fields.iter().chain(&self.computed_fields) {
            if !fields.contains(field.as_str()) {
                return Err(DatabaseError::configuration(format!(
                    "{shape}: '{field}' is not a declared column"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`EntityMetadata`]
#[derive(Debug, Clone)]
pub struct EntityMetadataBuilder {
    metadata: EntityMetadata,
}

impl EntityMetadataBuilder {
    /// Map `field` to `column`
    #[must_use]
    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.metadata.columns.push(ColumnMapping {
            field: field.into(),
            column: column.into(),
        });
        self
    }

    /// Mark `field` as part of the key
    #[must_use]
    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.metadata.key_fields.push(field.into());
        self
    }

    /// Mark `field` as computed by the storage (identity, defaults, triggers)
    #[must_use]
    pub fn computed(mut self, field: impl Into<String>) -> Self {
        self.metadata.computed_fields.push(field.into());
        self
    }

    pub fn build(self) -> EntityMetadata {
        self.metadata
    }
}

/// A shape persisted in a table
pub trait Entity: Shape + FromRow + Send + Sync {
    fn metadata() -> EntityMetadata;
}

/// Immutable map from entity shape to its metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entries: HashMap<ShapeId, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    pub fn builder() -> MetadataRegistryBuilder {
        MetadataRegistryBuilder::default()
    }

    /// Metadata registered for `shape`
    pub fn get(&self, shape: &ShapeId) -> Result<&Arc<EntityMetadata>> {
        self.entries
            .get(shape)
            .ok_or_else(|| DatabaseError::unknown_entity(shape.name()))
    }

    /// Metadata registered for entity `E`
    pub fn of<E: Entity>(&self) -> Result<&Arc<EntityMetadata>> {
        self.get(&ShapeId::of::<E>())
    }

    pub fn contains(&self, shape: &ShapeId) -> bool {
        self.entries.contains_key(shape)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects entity declarations into a [`MetadataRegistry`]
#[derive(Debug, Default)]
pub struct MetadataRegistryBuilder {
    entries: HashMap<ShapeId, Arc<EntityMetadata>>,
}

impl MetadataRegistryBuilder {
    /// Register entity `E` with the metadata it declares
    pub fn register<E: Entity>(self) -> Result<Self> {
        self.register_metadata(ShapeId::of::<E>(), E::metadata())
    }

    /// Register explicit metadata for a shape
    pub fn register_metadata(mut self, shape: ShapeId, metadata: EntityMetadata) -> Result<Self> {
        metadata.validate(shape.name())?;
        if self.entries.contains_key(&shape) {
            return Err(DatabaseError::configuration(format!(
                "{shape} registered twice"
            )));
        }
        log::debug!("registered {} -> [{}]", shape, metadata.table_name());
        self.entries.insert(shape, Arc::new(metadata));
        Ok(self)
    }

    pub fn build(self) -> MetadataRegistry {
        MetadataRegistry {
            entries: self.entries,
        }
    }
}

/// Declare an entity: its shape, its table and its field-to-column mapping.
///
/// Flags in brackets after a column mark the field as `key` and/or `computed`.
///
/// ```rust
/// use entity_query::impl_entity;
///
/// #[derive(Debug, Clone, Default)]
/// struct Driver {
///     id: i64,
///     name: String,
/// }
///
/// impl_entity!(Driver => "Drivers" {
///     id: "Id" [key, computed],
///     name: "Name",
/// });
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ident => $table:literal {
        $($field:ident : $column:literal $([$($flag:ident),+ $(,)?])?),+ $(,)?
    }) => {
        $crate::impl_shape!($ty { $($field),+ });

        impl $crate::core::metadata::Entity for $ty {
            fn metadata() -> $crate::core::metadata::EntityMetadata {
                $crate::core::metadata::EntityMetadata::builder($table)
                    $(
                        .column(stringify!($field), $column)
                        $($(.$flag(stringify!($field)))+)?
                    )+
                    .build()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Station {
        id: i64,
        city: String,
        opened: bool,
    }

    crate::impl_entity!(Station => "Stations" {
        id: "StationId" [key, computed],
        city: "City",
        opened: "IsOpen",
    });

    #[derive(Debug, Clone, Default)]
    struct Unregistered {
        id: i64,
    }

    crate::impl_shape!(Unregistered { id });

    #[test]
    fn test_declared_metadata() {
        let meta = Station::metadata();
        assert_eq!(meta.table_name(), "Stations");
        assert_eq!(meta.columns().len(), 3);
        assert_eq!(meta.key_fields(), &["id".to_string()]);
        assert!(meta.is_computed("id"));
        assert_eq!(meta.writable_columns().count(), 2);
        assert_eq!(meta.primary_key().unwrap().column, "StationId");
    }

    #[test]
    fn test_column_resolution_prefers_field_name() {
        let meta = Station::metadata();
        assert_eq!(meta.column_for("city").unwrap().column, "City");
        assert_eq!(meta.column_for("IsOpen").unwrap().field, "opened");
        assert!(meta.column_for("Country").is_none());
    }

    #[test]
    fn test_fallback_order_without_key() {
        let meta = EntityMetadata::builder("Log")
            .column("at", "At")
            .column("text", "Text")
            .build();
        let columns: Vec<_> = meta
            .fallback_order_columns()
            .iter()
            .map(|c| c.column.as_str())
            .collect();
        assert_eq!(columns, ["At", "Text"]);
    }

    #[test]
    fn test_fallback_order_covers_composite_key() {
        let meta = EntityMetadata::builder("Seats")
            .column("trip_id", "TripId")
            .column("number", "Number")
            .column("label", "Label")
            .key("trip_id")
            .key("number")
            .build();
        let columns: Vec<_> = meta
            .fallback_order_columns()
            .iter()
            .map(|c| c.column.as_str())
            .collect();
        assert_eq!(columns, ["TripId", "Number"]);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = MetadataRegistry::builder()
            .register::<Station>()
            .unwrap()
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.of::<Station>().unwrap().table_name(), "Stations");

        let err = registry.get(&ShapeId::of::<Unregistered>()).unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownEntity(name) if name == "Unregistered"));
    }

    #[test]
    fn test_registration_validates() {
        let bad_key = EntityMetadata::builder("T").column("a", "A").key("b").build();
        let err = MetadataRegistry::builder()
            .register_metadata(ShapeId::of::<Unregistered>(), bad_key)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration(_)));

        let duplicate = EntityMetadata::builder("T")
            .column("a", "A")
            .column("a", "B")
            .build();
        assert!(MetadataRegistry::builder()
            .register_metadata(ShapeId::of::<Unregistered>(), duplicate)
            .is_err());

        let twice = MetadataRegistry::builder()
            .register::<Station>()
            .unwrap()
            .register::<Station>();
        assert!(twice.is_err());
    }

    #[test]
    fn test_shape_id_identity() {
        assert_eq!(ShapeId::of::<Station>(), ShapeId::of::<Station>());
        assert_ne!(ShapeId::of::<Station>(), ShapeId::of::<Unregistered>());
        assert_eq!(ShapeId::of::<Station>().to_string(), "Station");
    }
}
