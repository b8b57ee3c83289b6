//! Expression to SQL translation
//!
//! The translator walks an [`Expr`] and produces a SQL fragment. Field references
//! are resolved through an [`AliasScope`] to `[alias].[Column]`. Every constant
//! becomes a named parameter in a shared [`Parameters`] list; no literal value is
//! ever written into the SQL text. Nodes without a SQL form fail translation.

use super::convert::bind_value;
use super::dialect::qualified;
use super::error::{DatabaseError, Result};
use super::expression::{AggregateFunction, BinaryOperator, Expr, FieldRef, MethodKind, TableRef};
use super::metadata::{EntityMetadata, MetadataRegistry};
use super::query::TableSource;
use super::value::DatabaseValue;
use serde::Serialize;
use std::sync::Arc;

/// One bound parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParam {
    /// `@p0`, `@p1`, …
    pub name: String,
    pub value: DatabaseValue,
}

/// Parameters of one statement, named in order of appearance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Parameters {
    params: Vec<SqlParam>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return the placeholder that refers to it
    pub fn push(&mut self, value: DatabaseValue) -> String {
        let name = format!("@p{}", self.params.len());
        self.params.push(SqlParam {
            name: name.clone(),
            value: bind_value(value),
        });
        name
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SqlParam> {
        self.params.iter()
    }

    pub fn into_vec(self) -> Vec<SqlParam> {
        self.params
    }
}

/// A table source with its metadata resolved
#[derive(Debug, Clone)]
struct ScopedSource<'a> {
    source: &'a TableSource,
    metadata: Arc<EntityMetadata>,
}

/// Tables visible at one point of a statement
///
/// Join conditions see the base table and the joins up to their own; every other
/// clause sees all of them.
#[derive(Debug, Clone)]
pub struct AliasScope<'a> {
    sources: Vec<ScopedSource<'a>>,
    visible: usize,
}

impl<'a> AliasScope<'a> {
    /// Resolve metadata for every source. Fails on unregistered shapes and on
    /// duplicate aliases.
    pub fn new(
        registry: &MetadataRegistry,
        sources: impl IntoIterator<Item = &'a TableSource>,
    ) -> Result<Self> {
        let mut scoped: Vec<ScopedSource<'a>> = Vec::new();
        for source in sources {
            if scoped.iter().any(|s| s.source.alias == source.alias) {
                return Err(DatabaseError::configuration(format!(
                    "alias '{}' is bound twice",
                    source.alias
                )));
            }
            scoped.push(ScopedSource {
                source,
                metadata: Arc::clone(registry.get(&source.shape)?),
            });
        }
        let visible = scoped.len();
        Ok(Self {
            sources: scoped,
            visible,
        })
    }

    /// Same scope limited to the first `count` sources
    pub fn limited(&self, count: usize) -> Self {
        Self {
            sources: self.sources.clone(),
            visible: count.min(self.sources.len()),
        }
    }

    /// Metadata and alias of the base table
    pub fn base(&self) -> Result<(&str, &EntityMetadata)> {
        self.sources
            .first()
            .map(|s| (s.source.alias.as_str(), s.metadata.as_ref()))
            .ok_or_else(|| DatabaseError::configuration("query has no base table"))
    }

    /// Alias and metadata of every visible source, base table first
    pub fn tables(&self) -> impl Iterator<Item = (&str, &EntityMetadata)> {
        self.sources[..self.visible]
            .iter()
            .map(|s| (s.source.alias.as_str(), s.metadata.as_ref()))
    }

    fn source_for(&self, table: &TableRef) -> Result<&ScopedSource<'a>> {
        let visible = &self.sources[..self.visible];
        match table {
            TableRef::Current => visible
                .first()
                .ok_or_else(|| DatabaseError::configuration("query has no base table")),
            TableRef::Shape(shape) => visible
                .iter()
                .find(|s| s.source.shape == *shape)
                .ok_or_else(|| DatabaseError::unknown_alias(shape.name())),
            TableRef::Alias(alias) => visible
                .iter()
                .find(|s| &s.source.alias == alias)
                .ok_or_else(|| DatabaseError::unknown_alias(alias.clone())),
        }
    }

    /// `[alias].[Column]` for a field reference
    pub fn resolve(&self, field: &FieldRef) -> Result<String> {
        let scoped = self.source_for(&field.table)?;
        let mapping = scoped.metadata.column_for(&field.field).ok_or_else(|| {
            DatabaseError::unknown_field(scoped.source.shape.name(), field.field.clone())
        })?;
        Ok(qualified(&scoped.source.alias, &mapping.column))
    }
}

/// Translates expressions against one scope into one parameter list
pub struct Translator<'s, 'a, 'p> {
    scope: &'s AliasScope<'a>,
    params: &'p mut Parameters,
}

impl<'s, 'a, 'p> Translator<'s, 'a, 'p> {
    pub fn new(scope: &'s AliasScope<'a>, params: &'p mut Parameters) -> Self {
        Self { scope, params }
    }

    /// Translate a boolean expression (WHERE or ON)
    pub fn predicate(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Binary { op, left, right } if op.is_logical() => {
                let keyword = if *op == BinaryOperator::AndAlso { "AND" } else { "OR" };
                let left = self.predicate(left)?;
                let right = self.predicate(right)?;
                Ok(format!("({left} {keyword} {right})"))
            }
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.comparison(*op, left, right)
            }
            Expr::Binary { op, .. } => Err(DatabaseError::unsupported_predicate(format!(
                "arithmetic operator '{}'",
                op.symbol()
            ))),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.predicate(inner)?)),
            Expr::Field(_) | Expr::Constant(_) => Ok(format!("{} = 1", self.value(expr, false)?)),
            Expr::Call {
                method,
                target,
                argument,
            } => self.call(method, target, argument.as_deref()),
            Expr::Aggregate { .. } => Err(DatabaseError::unsupported_predicate(format!(
                "aggregate '{expr}' in a filter"
            ))),
        }
    }

    /// Translate a value expression (select list, GROUP BY, ORDER BY)
    pub fn selector(&mut self, expr: &Expr) -> Result<String> {
        self.value(expr, true)
    }

    fn comparison(&mut self, op: BinaryOperator, left: &Expr, right: &Expr) -> Result<String> {
        let subject = match (is_null_constant(left), is_null_constant(right)) {
            (false, true) => Some(left),
            (true, false) => Some(right),
            (true, true) => {
                return Err(DatabaseError::unsupported_predicate(
                    "comparison between two null constants",
                ))
            }
            (false, false) => None,
        };

        if let Some(subject) = subject {
            let column = self.value(subject, false)?;
            return match op {
                BinaryOperator::Equal => Ok(format!("{column} IS NULL")),
                BinaryOperator::NotEqual => Ok(format!("{column} IS NOT NULL")),
                other => Err(DatabaseError::unsupported_predicate(format!(
                    "operator '{}' against null",
                    other.symbol()
                ))),
            };
        }

        let operator = comparison_sql(op).ok_or_else(|| {
            DatabaseError::unsupported_predicate(format!("'{}' is not a comparison", op.symbol()))
        })?;
        let left = self.value(left, false)?;
        let right = self.value(right, false)?;
        Ok(format!("{left} {operator} {right}"))
    }

    fn call(&mut self, method: &MethodKind, target: &Expr, argument: Option<&Expr>) -> Result<String> {
        match method {
            MethodKind::Contains | MethodKind::StartsWith | MethodKind::EndsWith => {
                let column = self.value(target, false)?;
                let text = match argument {
                    Some(Expr::Constant(DatabaseValue::String(text))) => text,
                    _ => {
                        return Err(DatabaseError::unsupported_predicate(format!(
                            "{}() needs a string constant argument",
                            method.name()
                        )))
                    }
                };
                let pattern = match method {
                    MethodKind::Contains => format!("%{text}%"),
                    MethodKind::StartsWith => format!("{text}%"),
                    _ => format!("%{text}"),
                };
                let param = self.params.push(DatabaseValue::String(pattern));
                Ok(format!("{column} LIKE {param}"))
            }
            MethodKind::IsNull => Ok(format!("{} IS NULL", self.value(target, false)?)),
            MethodKind::IsNotNull => Ok(format!("{} IS NOT NULL", self.value(target, false)?)),
            MethodKind::Other(name) => Err(DatabaseError::unsupported_predicate(format!(
                "method '{name}' has no SQL translation"
            ))),
        }
    }

    fn value(&mut self, expr: &Expr, allow_aggregates: bool) -> Result<String> {
        match expr {
            Expr::Field(field) => self.scope.resolve(field),
            Expr::Constant(value) => Ok(self.params.push(value.clone())),
            Expr::Aggregate { function, argument } => {
                if !allow_aggregates {
                    return Err(DatabaseError::unsupported_predicate(format!(
                        "aggregate '{expr}' is not allowed here"
                    )));
                }
                match (function, argument) {
                    (AggregateFunction::Count, None) => Ok("COUNT(*)".to_string()),
                    (function, None) => Err(DatabaseError::unsupported_predicate(format!(
                        "{} needs an argument",
                        function.to_str()
                    ))),
                    (AggregateFunction::Avg, Some(argument)) => {
                        Ok(format!("AVG(CAST({} AS FLOAT))", self.value(argument, false)?))
                    }
                    (function, Some(argument)) => Ok(format!(
                        "{}({})",
                        function.to_str(),
                        self.value(argument, false)?
                    )),
                }
            }
            other => Err(DatabaseError::unsupported_predicate(format!(
                "'{other}' cannot be used as a value"
            ))),
        }
    }
}

fn is_null_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Constant(DatabaseValue::Null))
}

fn comparison_sql(op: BinaryOperator) -> Option<&'static str> {
    match op {
        BinaryOperator::Equal => Some("="),
        BinaryOperator::NotEqual => Some("<>"),
        BinaryOperator::GreaterThan => Some(">"),
        BinaryOperator::GreaterOrEqual => Some(">="),
        BinaryOperator::LessThan => Some("<"),
        BinaryOperator::LessOrEqual => Some("<="),
        _ => None,
    }
}
