//! Insert, update and delete statement builders
//!
//! Write statements address one table by its entity shape. Columns are named by
//! field and resolved through the entity's metadata, values pass the parameter
//! binder, and predicates are translated the same way query filters are, against
//! the table name itself rather than an alias.

use super::convert::ToDbValue;
use super::database::Statement;
use super::dialect::{qualified, quote_ident, SqlDialect};
use super::error::{DatabaseError, Result};
use super::expression::Expr;
use super::metadata::{ColumnMapping, Entity, EntityMetadata, MetadataRegistry, ShapeId};
use super::query::TableSource;
use super::row_mapper::Shape;
use super::translator::{AliasScope, Parameters, Translator};
use super::value::DatabaseValue;
use std::fmt::Write as _;
use std::sync::Arc;

/// Most rows one multi-row `VALUES` list may carry
pub const MAX_ROWS_PER_INSERT: usize = 1000;

/// The table a write statement targets
#[derive(Debug, Clone)]
struct WriteTarget<'r> {
    registry: &'r MetadataRegistry,
    source: TableSource,
    metadata: Arc<EntityMetadata>,
}

impl<'r> WriteTarget<'r> {
    fn new(registry: &'r MetadataRegistry, shape: ShapeId) -> Result<Self> {
        let metadata = Arc::clone(registry.get(&shape)?);
        let source = TableSource {
            shape,
            alias: metadata.table_name().to_string(),
        };
        Ok(Self {
            registry,
            source,
            metadata,
        })
    }

    fn table(&self) -> String {
        quote_ident(self.metadata.table_name())
    }

    fn column(&self, field: &str) -> Result<&ColumnMapping> {
        self.metadata
            .column_for(field)
            .ok_or_else(|| DatabaseError::unknown_field(self.source.shape.name(), field))
    }

    fn writable_column(&self, field: &str) -> Result<ColumnMapping> {
        let mapping = self.column(field)?;
        if self.metadata.is_computed(&mapping.field) {
            return Err(DatabaseError::configuration(format!(
                "{}.{} is computed by the storage and cannot be written",
                self.source.shape, mapping.field
            )));
        }
        Ok(mapping.clone())
    }

    fn write_where(
        &self,
        sql: &mut String,
        conditions: &[Condition],
        params: &mut Parameters,
    ) -> Result<()> {
        if conditions.is_empty() {
            return Ok(());
        }
        let scope = AliasScope::new(self.registry, std::iter::once(&self.source))?;
        let mut fragments = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let fragment = match condition {
                Condition::Equals { column, value } => {
                    let column = qualified(&self.source.alias, column);
                    if matches!(value, DatabaseValue::Null) {
                        format!("{column} IS NULL")
                    } else {
                        format!("{column} = {}", params.push(value.clone()))
                    }
                }
                Condition::Predicate(predicate) => {
                    Translator::new(&scope, params).predicate(predicate)?
                }
            };
            fragments.push(format!("({fragment})"));
        }
        let _ = write!(sql, " WHERE {}", fragments.join(" AND "));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Equals { column: String, value: DatabaseValue },
    Predicate(Expr),
}

/// Values of `entity` for `columns`, in column order
fn shape_row<S: Shape>(entity: &S, columns: &[ColumnMapping]) -> Result<Vec<DatabaseValue>> {
    let mut values = entity.to_values();
    columns
        .iter()
        .map(|mapping| {
            values
                .iter_mut()
                .find(|(field, _)| *field == mapping.field)
                .map(|(_, value)| std::mem::take(value))
                .ok_or_else(|| DatabaseError::unknown_field(S::shape_name(), mapping.field.clone()))
        })
        .collect()
}

/// INSERT statement builder
///
/// ```rust
/// use entity_query::prelude::*;
///
/// #[derive(Debug, Clone, Default)]
/// struct Seat {
///     id: i64,
///     trip_id: i64,
///     label: String,
/// }
///
/// entity_query::impl_entity!(Seat => "Seats" {
///     id: "Id" [key, computed],
///     trip_id: "TripId",
///     label: "Label",
/// });
///
/// let registry = MetadataRegistry::builder().register::<Seat>()?.build();
/// let statement = InsertBuilder::of::<Seat>(&registry)?
///     .columns(&["trip_id", "label"])?
///     .values(vec![DatabaseValue::Long(1), DatabaseValue::from("1A")])?
///     .values(vec![DatabaseValue::Long(1), DatabaseValue::from("1B")])?
///     .returning_key()
///     .build(SqlDialect::SqlServer)?;
///
/// assert_eq!(
///     statement.sql,
///     "INSERT INTO [Seats] ([TripId], [Label]) OUTPUT INSERTED.[Id] VALUES (@p0, @p1), (@p2, @p3)"
/// );
/// # Ok::<(), DatabaseError>(())
/// ```
#[derive(Debug, Clone)]
pub struct InsertBuilder<'r> {
    target: WriteTarget<'r>,
    columns: Vec<ColumnMapping>,
    rows: Vec<Vec<DatabaseValue>>,
    return_key: bool,
}

impl<'r> InsertBuilder<'r> {
    pub fn new(registry: &'r MetadataRegistry, shape: ShapeId) -> Result<Self> {
        Ok(Self {
            target: WriteTarget::new(registry, shape)?,
            columns: Vec::new(),
            rows: Vec::new(),
            return_key: false,
        })
    }

    pub fn of<E: Entity>(registry: &'r MetadataRegistry) -> Result<Self> {
        Self::new(registry, ShapeId::of::<E>())
    }

    /// Set the column list. Fields may be given by field or column name.
    pub fn columns(mut self, fields: &[&str]) -> Result<Self> {
        if !self.rows.is_empty() {
            return Err(DatabaseError::configuration(
                "columns must be set before any row is added",
            ));
        }
        self.columns = fields
            .iter()
            .map(|field| self.target.writable_column(field))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Add one row of values, in column order
    pub fn values(mut self, row: Vec<DatabaseValue>) -> Result<Self> {
        if self.columns.is_empty() {
            return Err(DatabaseError::configuration("insert has no columns"));
        }
        if row.len() != self.columns.len() {
            return Err(DatabaseError::configuration(format!(
                "insert row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(self)
    }

    /// Add the row an entity value describes. Without an explicit column list,
    /// every column not computed by the storage is written.
    pub fn entity<S: Shape>(mut self, entity: &S) -> Result<Self> {
        if self.columns.is_empty() {
            self.columns = self.target.metadata.writable_columns().cloned().collect();
        }
        let row = shape_row(entity, &self.columns)?;
        self.values(row)
    }

    /// Return the generated key of every inserted row
    #[must_use]
    pub fn returning_key(mut self) -> Self {
        self.return_key = true;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// One statement carrying every row
    pub fn build(&self, dialect: SqlDialect) -> Result<Statement> {
        let needed = self.rows.len() * self.columns.len();
        if needed > dialect.max_parameters() || self.rows.len() > MAX_ROWS_PER_INSERT {
            return Err(DatabaseError::configuration(format!(
                "insert of {} rows exceeds one {} statement; build it in batches",
                self.rows.len(),
                dialect
            )));
        }
        self.render(dialect, &self.rows)
    }

    /// Statements carrying the rows in order, each within the dialect's
    /// parameter ceiling
    pub fn build_batches(&self, dialect: SqlDialect) -> Result<Vec<Statement>> {
        let width = self.columns.len().max(1);
        let per_batch = (dialect.max_parameters() / width).clamp(1, MAX_ROWS_PER_INSERT);
        self.rows
            .chunks(per_batch)
            .map(|rows| self.render(dialect, rows))
            .collect()
    }

    fn render(&self, dialect: SqlDialect, rows: &[Vec<DatabaseValue>]) -> Result<Statement> {
        if self.columns.is_empty() || rows.is_empty() {
            return Err(DatabaseError::configuration("insert has no rows"));
        }
        let key = if self.return_key {
            let key = self.target.metadata.primary_key().ok_or_else(|| {
                DatabaseError::configuration(format!(
                    "{} has no key to return",
                    self.target.source.shape
                ))
            })?;
            Some(key.column.as_str())
        } else {
            None
        };

        let mut params = Parameters::new();
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(&c.column)).collect();
        let mut sql = format!("INSERT INTO {} ({})", self.target.table(), columns.join(", "));
        if let Some(clause) = key.and_then(|k| dialect.output_clause(k)) {
            sql.push_str(&clause);
        }
        sql.push_str(" VALUES ");
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let placeholders: Vec<String> =
                    row.iter().map(|value| params.push(value.clone())).collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        sql.push_str(&tuples.join(", "));
        if let Some(clause) = key.and_then(|k| dialect.returning_clause(k)) {
            sql.push_str(&clause);
        }
        Ok(Statement::from_parameters(sql, params))
    }
}

/// UPDATE statement builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder<'r> {
    target: WriteTarget<'r>,
    assignments: Vec<(ColumnMapping, DatabaseValue)>,
    conditions: Vec<Condition>,
}

impl<'r> UpdateBuilder<'r> {
    pub fn new(registry: &'r MetadataRegistry, shape: ShapeId) -> Result<Self> {
        Ok(Self {
            target: WriteTarget::new(registry, shape)?,
            assignments: Vec::new(),
            conditions: Vec::new(),
        })
    }

    pub fn of<E: Entity>(registry: &'r MetadataRegistry) -> Result<Self> {
        Self::new(registry, ShapeId::of::<E>())
    }

    /// Set a column value
    pub fn set(mut self, field: &str, value: impl ToDbValue) -> Result<Self> {
        let mapping = self.target.writable_column(field)?;
        self.assignments.push((mapping, value.to_db_value()));
        Ok(self)
    }

    /// Add a `column = value` condition
    pub fn where_eq(mut self, field: &str, value: impl ToDbValue) -> Result<Self> {
        let column = self.target.column(field)?.column.clone();
        self.conditions.push(Condition::Equals {
            column,
            value: value.to_db_value(),
        });
        Ok(self)
    }

    /// Add a predicate over the table's fields
    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.conditions.push(Condition::Predicate(predicate));
        self
    }

    /// Write every non-key column of `entity`, matching the row by its key
    pub fn entity<S: Shape>(mut self, entity: &S) -> Result<Self> {
        let metadata = Arc::clone(&self.target.metadata);
        if metadata.key_fields().is_empty() {
            return Err(DatabaseError::configuration(format!(
                "{} has no key to match rows by",
                self.target.source.shape
            )));
        }
        let set: Vec<ColumnMapping> = metadata
            .writable_columns()
            .filter(|c| !metadata.is_key(&c.field))
            .cloned()
            .collect();
        let keys: Vec<ColumnMapping> = metadata
            .key_fields()
            .iter()
            .map(|field| self.target.column(field).cloned())
            .collect::<Result<_>>()?;

        for (mapping, value) in set.iter().cloned().zip(shape_row(entity, &set)?) {
            self.assignments.push((mapping, value));
        }
        for (mapping, value) in keys.iter().zip(shape_row(entity, &keys)?) {
            self.conditions.push(Condition::Equals {
                column: mapping.column.clone(),
                value,
            });
        }
        Ok(self)
    }

    pub fn build(&self) -> Result<Statement> {
        if self.assignments.is_empty() {
            return Err(DatabaseError::configuration("update sets no columns"));
        }
        let mut params = Parameters::new();
        let set_clauses: Vec<String> = self
            .assignments
            .iter()
            .map(|(mapping, value)| {
                format!("{} = {}", quote_ident(&mapping.column), params.push(value.clone()))
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.target.table(), set_clauses.join(", "));
        self.target.write_where(&mut sql, &self.conditions, &mut params)?;
        Ok(Statement::from_parameters(sql, params))
    }
}

/// DELETE statement builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder<'r> {
    target: WriteTarget<'r>,
    conditions: Vec<Condition>,
}

impl<'r> DeleteBuilder<'r> {
    pub fn new(registry: &'r MetadataRegistry, shape: ShapeId) -> Result<Self> {
        Ok(Self {
            target: WriteTarget::new(registry, shape)?,
            conditions: Vec::new(),
        })
    }

    pub fn of<E: Entity>(registry: &'r MetadataRegistry) -> Result<Self> {
        Self::new(registry, ShapeId::of::<E>())
    }

    pub fn where_eq(mut self, field: &str, value: impl ToDbValue) -> Result<Self> {
        let column = self.target.column(field)?.column.clone();
        self.conditions.push(Condition::Equals {
            column,
            value: value.to_db_value(),
        });
        Ok(self)
    }

    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.conditions.push(Condition::Predicate(predicate));
        self
    }

    /// Match the row `entity` is stored in, by its key
    pub fn entity<S: Shape>(mut self, entity: &S) -> Result<Self> {
        let keys: Vec<ColumnMapping> = self
            .target
            .metadata
            .key_fields()
            .iter()
            .map(|field| self.target.column(field).cloned())
            .collect::<Result<_>>()?;
        if keys.is_empty() {
            return Err(DatabaseError::configuration(format!(
                "{} has no key to match rows by",
                self.target.source.shape
            )));
        }
        for (mapping, value) in keys.iter().zip(shape_row(entity, &keys)?) {
            self.conditions.push(Condition::Equals {
                column: mapping.column.clone(),
                value,
            });
        }
        Ok(self)
    }

    pub fn build(&self) -> Result<Statement> {
        let mut params = Parameters::new();
        let mut sql = format!("DELETE FROM {}", self.target.table());
        self.target.write_where(&mut sql, &self.conditions, &mut params)?;
        Ok(Statement::from_parameters(sql, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Booking {
        id: i64,
        trip_id: i64,
        passenger: String,
        seats: i32,
    }

    crate::impl_entity!(Booking => "Bookings" {
        id: "Id" [key, computed],
        trip_id: "TripId",
        passenger: "Passenger",
        seats: "Seats",
    });

    #[derive(Debug, Clone, Default)]
    struct AuditEntry {
        message: String,
    }

    crate::impl_entity!(AuditEntry => "Audit" {
        message: "Message",
    });

    fn registry() -> MetadataRegistry {
        MetadataRegistry::builder()
            .register::<Booking>()
            .unwrap()
            .register::<AuditEntry>()
            .unwrap()
            .build()
    }

    fn booking(trip_id: i64, passenger: &str) -> Booking {
        Booking {
            id: 0,
            trip_id,
            passenger: passenger.to_string(),
            seats: 1,
        }
    }

    #[test]
    fn test_insert_entity_skips_computed_columns() {
        let registry = registry();
        let statement = InsertBuilder::of::<Booking>(&registry)
            .unwrap()
            .entity(&booking(3, "Ana"))
            .unwrap()
            .build(SqlDialect::SqlServer)
            .unwrap();

        assert_eq!(
            statement.sql,
            "INSERT INTO [Bookings] ([TripId], [Passenger], [Seats]) VALUES (@p0, @p1, @p2)"
        );
        assert_eq!(statement.params[0].value, DatabaseValue::Long(3));
        assert_eq!(statement.params[1].value, DatabaseValue::String("Ana".into()));
    }

    #[test]
    fn test_insert_returning_key_per_dialect() {
        let registry = registry();
        let builder = InsertBuilder::of::<Booking>(&registry)
            .unwrap()
            .entity(&booking(3, "Ana"))
            .unwrap()
            .returning_key();

        let sql_server = builder.build(SqlDialect::SqlServer).unwrap();
        assert!(sql_server
            .sql
            .contains("([TripId], [Passenger], [Seats]) OUTPUT INSERTED.[Id] VALUES"));

        let sqlite = builder.build(SqlDialect::Sqlite).unwrap();
        assert!(sqlite.sql.ends_with("VALUES (@p0, @p1, @p2) RETURNING [Id]"));
    }

    #[test]
    fn test_insert_without_key_cannot_return_one() {
        let registry = registry();
        let result = InsertBuilder::of::<AuditEntry>(&registry)
            .unwrap()
            .entity(&AuditEntry {
                message: "x".into(),
            })
            .unwrap()
            .returning_key()
            .build(SqlDialect::Sqlite);
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    }

    #[test]
    fn test_insert_rejects_computed_and_unknown_columns() {
        let registry = registry();
        let computed = InsertBuilder::of::<Booking>(&registry).unwrap().columns(&["id"]);
        assert!(matches!(computed, Err(DatabaseError::Configuration(_))));

        let unknown = InsertBuilder::of::<Booking>(&registry).unwrap().columns(&["fare"]);
        assert!(matches!(unknown, Err(DatabaseError::UnknownField { .. })));
    }

    #[test]
    fn test_insert_row_width_is_checked() {
        let registry = registry();
        let result = InsertBuilder::of::<Booking>(&registry)
            .unwrap()
            .columns(&["trip_id", "passenger"])
            .unwrap()
            .values(vec![DatabaseValue::Long(1)]);
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    }

    #[test]
    fn test_insert_batches_respect_parameter_ceiling() {
        let registry = registry();
        let mut builder = InsertBuilder::of::<Booking>(&registry).unwrap();
        for i in 0..1500 {
            builder = builder.entity(&booking(i, "P")).unwrap();
        }

        // 3 columns per row, 2000 parameters per SQL Server statement
        let batches = builder.build_batches(SqlDialect::SqlServer).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].params.len(), 666 * 3);
        assert_eq!(batches[2].params.len(), (1500 - 2 * 666) * 3);
        assert!(batches
            .iter()
            .all(|b| b.params.len() <= SqlDialect::SqlServer.max_parameters()));
        assert!(batches[1].sql.contains("(@p0, @p1, @p2)"));

        assert!(builder.build(SqlDialect::SqlServer).is_err());

        let sqlite = builder.build_batches(SqlDialect::Sqlite).unwrap();
        assert_eq!(sqlite.len(), 2);
    }

    #[test]
    fn test_update_entity_by_key() {
        let registry = registry();
        let mut entity = booking(4, "Ben");
        entity.id = 12;
        let statement = UpdateBuilder::of::<Booking>(&registry)
            .unwrap()
            .entity(&entity)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            statement.sql,
            "UPDATE [Bookings] SET [TripId] = @p0, [Passenger] = @p1, [Seats] = @p2 \
             WHERE ([Bookings].[Id] = @p3)"
        );
        assert_eq!(statement.params[3].value, DatabaseValue::Long(12));
    }

    #[test]
    fn test_update_with_predicate() {
        let registry = registry();
        let statement = UpdateBuilder::of::<Booking>(&registry)
            .unwrap()
            .set("seats", 0)
            .unwrap()
            .where_eq("trip_id", 9_i64)
            .unwrap()
            .filter(Expr::field("passenger").starts_with("A"))
            .build()
            .unwrap();

        assert_eq!(
            statement.sql,
            "UPDATE [Bookings] SET [Seats] = @p0 WHERE ([Bookings].[TripId] = @p1) \
             AND ([Bookings].[Passenger] LIKE @p2)"
        );
        assert_eq!(statement.params[2].value, DatabaseValue::String("A%".into()));
    }

    #[test]
    fn test_update_requires_assignments() {
        let registry = registry();
        let result = UpdateBuilder::of::<Booking>(&registry).unwrap().build();
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    }

    #[test]
    fn test_delete() {
        let registry = registry();
        let all = DeleteBuilder::of::<Booking>(&registry).unwrap().build().unwrap();
        assert_eq!(all.sql, "DELETE FROM [Bookings]");

        let statement = DeleteBuilder::of::<Booking>(&registry)
            .unwrap()
            .where_eq("passenger", Option::<String>::None)
            .unwrap()
            .filter(Expr::field("seats").gt(2))
            .build()
            .unwrap();
        assert_eq!(
            statement.sql,
            "DELETE FROM [Bookings] WHERE ([Bookings].[Passenger] IS NULL) AND ([Bookings].[Seats] > @p0)"
        );
        assert_eq!(statement.params.len(), 1);
    }

    #[test]
    fn test_delete_entity_without_key_fails() {
        let registry = registry();
        let result = DeleteBuilder::of::<AuditEntry>(&registry)
            .unwrap()
            .entity(&AuditEntry::default());
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    }
}
