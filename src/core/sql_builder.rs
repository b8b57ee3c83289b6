//! SQL statement builder
//!
//! Compiles a [`QueryModel`] into one parameterized [`Statement`]. Clauses are
//! emitted in SQL order (select list, FROM and joins, WHERE, GROUP BY, ORDER BY,
//! paging) and so are their parameters, which keeps `@pN` numbering aligned with
//! the text.

use super::database::Statement;
use super::dialect::{qualified, quote_ident, SqlDialect};
use super::error::{DatabaseError, Result};
use super::expression::{AggregateFunction, Expr, TableRef};
use super::metadata::MetadataRegistry;
use super::query::{JoinKind, QueryModel, QueryParts};
use super::translator::{AliasScope, Parameters, Translator};
use super::value::DatabaseValue;
use std::collections::HashSet;
use std::fmt::Write as _;

/// Alias of the derived table in wrapped statements
const SUBQUERY_ALIAS: &str = "sub";
/// Column alias of scalar aggregate results
pub const SCALAR_ALIAS: &str = "value";

/// Single-column shape used to re-project a model for scalar aggregates
#[derive(Debug, Default)]
struct ScalarValue {
    value: DatabaseValue,
}

crate::impl_shape!(ScalarValue { value });

/// Compiles query models against a metadata registry
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder<'r> {
    registry: &'r MetadataRegistry,
    dialect: SqlDialect,
}

impl<'r> SqlBuilder<'r> {
    pub fn new(registry: &'r MetadataRegistry, dialect: SqlDialect) -> Self {
        Self { registry, dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// The model's rows
    pub fn select<T>(&self, model: &QueryModel<T>) -> Result<Statement> {
        let mut params = Parameters::new();
        let sql = self.select_sql(model.parts(), &mut params)?;
        Ok(Statement::from_parameters(sql, params))
    }

    /// Number of rows the model returns, pagination included
    pub fn count<T>(&self, model: &QueryModel<T>) -> Result<Statement> {
        self.wrap_count(&derived_parts(model))
    }

    /// Number of rows the model ranges over before ordering and pagination
    pub fn total_count<T>(&self, model: &QueryModel<T>) -> Result<Statement> {
        self.wrap_count(model.for_count().parts())
    }

    /// `1` if the model returns any row, otherwise `0`
    pub fn exists<T>(&self, model: &QueryModel<T>) -> Result<Statement> {
        let mut params = Parameters::new();
        let inner = self.select_sql(&derived_parts(model), &mut params)?;
        let sql = format!("SELECT CASE WHEN EXISTS ({inner}) THEN 1 ELSE 0 END");
        Ok(Statement::from_parameters(sql, params))
    }

    /// One aggregate over `selector` across the model's rows.
    ///
    /// A selector naming an output column of the model aggregates that column of
    /// the full statement. Any other selector re-projects the model to a single
    /// column first.
    pub fn scalar_aggregate<T>(
        &self,
        model: &QueryModel<T>,
        function: AggregateFunction,
        selector: &Expr,
    ) -> Result<Statement> {
        let output = match selector {
            Expr::Field(field) if field.table == TableRef::Current => {
                let columns = self.output_columns(model.parts())?;
                columns.into_iter().find(|c| *c == field.field)
            }
            _ => None,
        };

        let mut params = Parameters::new();
        let (inner, column) = match output {
            Some(column) => (self.select_sql(&derived_parts(model), &mut params)?, column),
            None => {
                let projected = model.select::<ScalarValue>(&[(SCALAR_ALIAS, selector.clone())]);
                (
                    self.select_sql(&derived_parts(&projected), &mut params)?,
                    SCALAR_ALIAS.to_string(),
                )
            }
        };

        let target = qualified(SUBQUERY_ALIAS, &column);
        let aggregate = match function {
            AggregateFunction::Sum => format!("COALESCE(SUM({target}), 0)"),
            AggregateFunction::Avg => format!("AVG(CAST({target} AS FLOAT))"),
            other => format!("{}({target})", other.to_str()),
        };
        let sql = format!(
            "SELECT {aggregate} AS {} FROM ({inner}) AS {}",
            quote_ident(SCALAR_ALIAS),
            quote_ident(SUBQUERY_ALIAS)
        );
        Ok(Statement::from_parameters(sql, params))
    }

    fn wrap_count(&self, parts: &QueryParts) -> Result<Statement> {
        let mut params = Parameters::new();
        let inner = self.select_sql(parts, &mut params)?;
        let sql = format!(
            "SELECT COUNT(1) FROM ({inner}) AS {}",
            quote_ident(SUBQUERY_ALIAS)
        );
        Ok(Statement::from_parameters(sql, params))
    }

    /// Aliases of the columns the model's select list produces
    pub fn output_columns(&self, parts: &QueryParts) -> Result<Vec<String>> {
        if let Some(projection) = &parts.projection {
            return Ok(projection.items.iter().map(|i| i.field.clone()).collect());
        }
        if !parts.group.is_empty() || !parts.aggregates.is_empty() {
            return Ok(parts
                .group
                .iter()
                .map(|k| k.alias.clone())
                .chain(parts.aggregates.iter().map(|a| a.alias.clone()))
                .collect());
        }
        let metadata = self.registry.get(&parts.base.shape)?;
        Ok(metadata.columns().iter().map(|c| c.field.clone()).collect())
    }

    fn select_sql(&self, parts: &QueryParts, params: &mut Parameters) -> Result<String> {
        parts.check()?;
        let window = parts.window()?;
        let scope = AliasScope::new(self.registry, parts.sources())?;

        let mut sql = String::from("SELECT ");
        if parts.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.select_list(parts, &scope, params)?.join(", "));

        let (base_alias, base_metadata) = scope.base()?;
        let _ = write!(
            sql,
            " FROM {} AS {}",
            quote_ident(base_metadata.table_name()),
            quote_ident(base_alias)
        );

        for (index, join) in parts.joins.iter().enumerate() {
            let metadata = self.registry.get(&join.source.shape)?;
            let _ = write!(
                sql,
                " {} {} AS {}",
                join.kind.to_sql(),
                quote_ident(metadata.table_name()),
                quote_ident(&join.source.alias)
            );
            if join.kind == JoinKind::Cross {
                continue;
            }
            let on = join.on.as_ref().ok_or_else(|| {
                DatabaseError::unsupported_predicate(format!(
                    "{} on {} has no condition",
                    join.kind.to_sql(),
                    join.source.alias
                ))
            })?;
            // Base table plus joins up to and including this one.
            let visible = scope.limited(index + 2);
            let condition = Translator::new(&visible, params).predicate(on)?;
            let _ = write!(sql, " ON {condition}");
        }

        if !parts.filters.is_empty() {
            let mut translator = Translator::new(&scope, params);
            let fragments = parts
                .filters
                .iter()
                .map(|filter| translator.predicate(filter).map(|p| format!("({p})")))
                .collect::<Result<Vec<_>>>()?;
            let _ = write!(sql, " WHERE {}", fragments.join(" AND "));
        }

        let group = group_expressions(parts);
        if !group.is_empty() {
            let mut translator = Translator::new(&scope, params);
            let keys = group
                .iter()
                .map(|expr| translator.selector(expr))
                .collect::<Result<Vec<_>>>()?;
            let _ = write!(sql, " GROUP BY {}", keys.join(", "));
        }

        let mut orders: Vec<_> = parts.orders.iter().collect();
        orders.sort_by_key(|o| o.priority);
        if !orders.is_empty() {
            let mut translator = Translator::new(&scope, params);
            let keys = orders
                .iter()
                .map(|o| {
                    translator
                        .selector(&o.key)
                        .map(|key| format!("{key} {}", if o.ascending { "ASC" } else { "DESC" }))
                })
                .collect::<Result<Vec<_>>>()?;
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        } else if window.is_some() {
            let keys = self.fallback_order(parts, &group, &scope, params)?;
            let keys: Vec<_> = keys.iter().map(|key| format!("{key} ASC")).collect();
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        }

        if let Some(window) = window {
            self.dialect.write_pagination(&mut sql, window.skip, window.take);
        }

        Ok(sql)
    }

    fn select_list(
        &self,
        parts: &QueryParts,
        scope: &AliasScope<'_>,
        params: &mut Parameters,
    ) -> Result<Vec<String>> {
        let mut translator = Translator::new(scope, params);

        if let Some(projection) = &parts.projection {
            if projection.items.is_empty() {
                return Err(DatabaseError::unsupported_projection(format!(
                    "{} selects no fields",
                    projection.shape
                )));
            }
            let mut seen = HashSet::new();
            return projection
                .items
                .iter()
                .map(|item| {
                    if !seen.insert(item.field.as_str()) {
                        return Err(DatabaseError::unsupported_projection(format!(
                            "{}.{} projected twice",
                            projection.shape, item.field
                        )));
                    }
                    Ok(format!(
                        "{} AS {}",
                        translator.selector(&item.expr)?,
                        quote_ident(&item.field)
                    ))
                })
                .collect();
        }

        if !parts.group.is_empty() || !parts.aggregates.is_empty() {
            let mut columns = Vec::with_capacity(parts.group.len() + parts.aggregates.len());
            for key in &parts.group {
                columns.push(format!(
                    "{} AS {}",
                    translator.selector(&key.expr)?,
                    quote_ident(&key.alias)
                ));
            }
            for aggregate in &parts.aggregates {
                columns.push(format!(
                    "{} AS {}",
                    translator.selector(&aggregate.to_expr())?,
                    quote_ident(&aggregate.alias)
                ));
            }
            return Ok(columns);
        }

        let (alias, metadata) = scope.base()?;
        Ok(metadata
            .columns()
            .iter()
            .map(|c| format!("{} AS {}", qualified(alias, &c.column), quote_ident(&c.field)))
            .collect())
    }

    /// Deterministic order for a paginated statement without one.
    ///
    /// The keys identify a row: every group key for grouped output, every projected
    /// item under DISTINCT, otherwise the key columns of each source table.
    fn fallback_order(
        &self,
        parts: &QueryParts,
        group: &[&Expr],
        scope: &AliasScope<'_>,
        params: &mut Parameters,
    ) -> Result<Vec<String>> {
        let mut translator = Translator::new(scope, params);
        if !group.is_empty() {
            return group.iter().map(|expr| translator.selector(expr)).collect();
        }

        // Aggregation without grouping yields a single row.
        if let Some(aggregate) = parts.aggregates.first() {
            return Ok(vec![translator.selector(&aggregate.to_expr())?]);
        }
        if let Some(projection) = &parts.projection {
            if let Some(item) = projection.items.iter().find(|i| i.expr.contains_aggregate()) {
                return Ok(vec![translator.selector(&item.expr)?]);
            }
            if parts.distinct {
                return projection
                    .items
                    .iter()
                    .map(|item| translator.selector(&item.expr))
                    .collect();
            }
        }

        let keys: Vec<String> = scope
            .tables()
            .flat_map(|(alias, metadata)| {
                metadata
                    .fallback_order_columns()
                    .into_iter()
                    .map(move |c| qualified(alias, &c.column))
            })
            .collect();
        if keys.is_empty() {
            return Err(DatabaseError::unknown_entity(parts.base.shape.name()));
        }
        Ok(keys)
    }
}

/// Explicit group keys, or the plain items of a projection that aggregates
fn group_expressions(parts: &QueryParts) -> Vec<&Expr> {
    if !parts.group.is_empty() {
        return parts.group.iter().map(|k| &k.expr).collect();
    }
    match &parts.projection {
        Some(projection) if projection.items.iter().any(|i| i.expr.contains_aggregate()) => projection
            .items
            .iter()
            .filter(|i| !i.expr.contains_aggregate())
            .map(|i| &i.expr)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parts for a derived table: ordering is only kept when it decides the page
fn derived_parts<T>(model: &QueryModel<T>) -> QueryParts {
    if model.parts().pagination.is_some() {
        model.parts().clone()
    } else {
        model.without_ordering().parts().clone()
    }
}
