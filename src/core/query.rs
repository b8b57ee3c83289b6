//! Query model and fluent builder
//!
//! A [`QueryModel`] describes one query as data: the base entity, joins, filters,
//! projection, grouping, aggregates, ordering and pagination. Every builder call
//! borrows the model and returns a new one, so a model can be shared as a base for
//! several queries without interference.
//!
//! Field references to the working shape are resolved when they are added. Before
//! any `select`, grouping or aggregation they mean the base entity. After
//! `select::<P>` they name the fields of `P`, and are replaced by the expressions
//! those fields were projected from. Group and aggregate aliases are replaced the
//! same way. A reference that cannot be resolved is remembered and reported when
//! the model is compiled.

use super::error::{DatabaseError, Result};
use super::expression::{AggregateFunction, Expr, FieldRef, TableRef};
use super::filter::{Filter, SearchRequest, SortOption};
use super::metadata::{Entity, ShapeId};
use super::row_mapper::Shape;
use std::marker::PhantomData;

/// Alias of the base table
pub const BASE_ALIAS: &str = "t0";

/// A table in the FROM clause
#[derive(Debug, Clone, PartialEq)]
pub struct TableSource {
    pub shape: ShapeId,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinDescriptor {
    pub source: TableSource,
    pub kind: JoinKind,
    /// Join condition; `None` only for cross joins
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderDescriptor {
    pub key: Expr,
    pub ascending: bool,
    pub priority: u32,
}

/// Requested pagination, in either of its two forms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationDescriptor {
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Normalized pagination: rows to skip and, optionally, rows to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub skip: u64,
    pub take: Option<u64>,
}

impl PaginationDescriptor {
    /// Normalize into a window.
    ///
    /// An explicit skip or take wins over the value derived from page and page
    /// size, field by field.
    pub fn window(&self) -> Result<PageWindow> {
        if let Some(page) = self.page {
            if page < 1 {
                return Err(DatabaseError::invalid_pagination(format!(
                    "page must be at least 1, got {page}"
                )));
            }
        }
        if let Some(size) = self.page_size {
            if size < 1 {
                return Err(DatabaseError::invalid_pagination(format!(
                    "page size must be at least 1, got {size}"
                )));
            }
        }

        let derived_skip = match (self.page, self.page_size) {
            (Some(page), Some(size)) => Some((page - 1).saturating_mul(size)),
            _ => None,
        };
        Ok(PageWindow {
            skip: self.skip.or(derived_skip).unwrap_or(0),
            take: self.take.or(self.page_size),
        })
    }
}

/// A projected field and the expression it is computed from
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub field: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Name of the projected shape
    pub shape: &'static str,
    pub items: Vec<ProjectionItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey {
    pub alias: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDescriptor {
    pub function: AggregateFunction,
    pub selector: Option<Expr>,
    pub alias: String,
}

impl AggregateDescriptor {
    pub fn to_expr(&self) -> Expr {
        Expr::aggregate(self.function, self.selector.clone())
    }
}

/// Problem found while building, reported at compile time
#[derive(Debug, Clone, PartialEq)]
enum DeferredError {
    UnknownField { shape: String, field: String },
    UnsupportedProjection(String),
}

impl DeferredError {
    fn from_error(error: DatabaseError) -> Self {
        match error {
            DatabaseError::UnknownField { shape, field } => {
                DeferredError::UnknownField { shape, field }
            }
            other => DeferredError::UnsupportedProjection(other.to_string()),
        }
    }

    fn to_error(&self) -> DatabaseError {
        match self {
            DeferredError::UnknownField { shape, field } => {
                DatabaseError::unknown_field(shape.clone(), field.clone())
            }
            DeferredError::UnsupportedProjection(message) => {
                DatabaseError::unsupported_projection(message.clone())
            }
        }
    }
}

/// Untyped contents of a query model
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParts {
    pub base: TableSource,
    pub joins: Vec<JoinDescriptor>,
    pub filters: Vec<Expr>,
    pub projection: Option<Projection>,
    pub group: Vec<GroupKey>,
    pub aggregates: Vec<AggregateDescriptor>,
    pub orders: Vec<OrderDescriptor>,
    pub pagination: Option<PaginationDescriptor>,
    pub distinct: bool,
    deferred: Option<DeferredError>,
}

impl QueryParts {
    fn new(base: ShapeId) -> Self {
        Self {
            base: TableSource {
                shape: base,
                alias: BASE_ALIAS.to_string(),
            },
            joins: Vec::new(),
            filters: Vec::new(),
            projection: None,
            group: Vec::new(),
            aggregates: Vec::new(),
            orders: Vec::new(),
            pagination: None,
            distinct: false,
            deferred: None,
        }
    }

    /// Fail if building recorded an unresolved reference
    pub fn check(&self) -> Result<()> {
        match &self.deferred {
            Some(error) => Err(error.to_error()),
            None => Ok(()),
        }
    }

    /// Normalized pagination window, if pagination was requested
    pub fn window(&self) -> Result<Option<PageWindow>> {
        self.pagination.as_ref().map(|p| p.window()).transpose()
    }

    /// All sources in FROM order: base first, then joins
    pub fn sources(&self) -> impl Iterator<Item = &TableSource> {
        std::iter::once(&self.base).chain(self.joins.iter().map(|j| &j.source))
    }

    fn next_alias(&self) -> String {
        format!("t{}", self.joins.len() + 1)
    }

    fn next_priority(&self) -> u32 {
        self.orders
            .iter()
            .map(|o| o.priority + 1)
            .max()
            .unwrap_or(0)
    }

    fn defer(&mut self, error: DatabaseError) {
        if self.deferred.is_none() {
            self.deferred = Some(DeferredError::from_error(error));
        }
    }

    /// Replace references to the working shape with what they stand for.
    fn resolve_current(&self, name: &str) -> Result<Expr> {
        if let Some(projection) = &self.projection {
            return projection
                .items
                .iter()
                .find(|item| item.field == name)
                .map(|item| item.expr.clone())
                .ok_or_else(|| DatabaseError::unknown_field(projection.shape, name));
        }
        if let Some(key) = self.group.iter().find(|k| k.alias == name) {
            return Ok(key.expr.clone());
        }
        if let Some(aggregate) = self.aggregates.iter().find(|a| a.alias == name) {
            return Ok(aggregate.to_expr());
        }
        Ok(Expr::field(name))
    }

    fn rebase(&self, expr: &Expr) -> Result<Expr> {
        expr.map_fields(&mut |field: &FieldRef| match &field.table {
            TableRef::Current => self.resolve_current(&field.field),
            _ => Ok(Expr::Field(field.clone())),
        })
    }

    /// Rebase `expr`, recording a failure and keeping the original on error
    fn rebase_or_defer(&mut self, expr: Expr) -> Expr {
        match self.rebase(&expr) {
            Ok(rebased) => rebased,
            Err(error) => {
                self.defer(error);
                expr
            }
        }
    }
}

/// Immutable description of a query whose rows map into `T`
pub struct QueryModel<T> {
    parts: QueryParts,
    _shape: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryModel<T> {
    fn clone(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for QueryModel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryModel")
            .field("parts", &self.parts)
            .finish()
    }
}

impl<T: Entity> Default for QueryModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> QueryModel<T> {
    /// Query over every row of entity `T`
    pub fn new() -> Self {
        Self {
            parts: QueryParts::new(ShapeId::of::<T>()),
            _shape: PhantomData,
        }
    }

    /// Query built from an API search request: its filters, its sorts, and its page
    pub fn search(request: &SearchRequest) -> Self {
        let mut model = Self::new();
        for filter in &request.filters {
            model = model.where_filter(filter);
        }
        for sort in &request.sorts {
            model = model.sort(sort);
        }
        model.page(request.page, request.page_size)
    }
}

impl<T> QueryModel<T> {
    fn derive(&self, change: impl FnOnce(&mut QueryParts)) -> Self {
        let mut parts = self.parts.clone();
        change(&mut parts);
        Self {
            parts,
            _shape: PhantomData,
        }
    }

    pub fn parts(&self) -> &QueryParts {
        &self.parts
    }

    /// Add a filter. Filters combine with AND.
    #[must_use]
    pub fn filter(&self, predicate: Expr) -> Self {
        self.derive(|parts| {
            let predicate = parts.rebase_or_defer(predicate);
            parts.filters.push(predicate);
        })
    }

    /// Add an API-boundary filter
    #[must_use]
    pub fn where_filter(&self, filter: &Filter) -> Self {
        self.filter(filter.to_expr())
    }

    /// Join entity `J` under the next free alias (`t1`, `t2`, …)
    #[must_use]
    pub fn join<J: Entity>(&self, kind: JoinKind, on: Expr) -> Self {
        let alias = self.parts.next_alias();
        self.join_as::<J>(alias, kind, on)
    }

    /// Join entity `J` under an explicit alias
    #[must_use]
    pub fn join_as<J: Entity>(&self, alias: impl Into<String>, kind: JoinKind, on: Expr) -> Self {
        let alias = alias.into();
        self.derive(|parts| {
            let on = parts.rebase_or_defer(on);
            parts.joins.push(JoinDescriptor {
                source: TableSource {
                    shape: ShapeId::of::<J>(),
                    alias,
                },
                kind,
                on: Some(on),
            });
        })
    }

    /// Cross join entity `J` under the next free alias
    #[must_use]
    pub fn cross_join<J: Entity>(&self) -> Self {
        self.derive(|parts| {
            let alias = parts.next_alias();
            parts.joins.push(JoinDescriptor {
                source: TableSource {
                    shape: ShapeId::of::<J>(),
                    alias,
                },
                kind: JoinKind::Cross,
                on: None,
            });
        })
    }

    /// Project into shape `P`.
    ///
    /// Each item names a field of `P` and the field or aggregate it is computed
    /// from. Later calls on the returned model refer to `P`'s fields.
    #[must_use]
    pub fn select<P: Shape>(&self, items: &[(&str, Expr)]) -> QueryModel<P> {
        let mut parts = self.parts.clone();
        let mut projected = Vec::new();
        for (field, expr) in items {
            let field = field.to_string();
            if !P::has_field(&field) {
                parts.defer(DatabaseError::unknown_field(P::shape_name(), field.clone()));
            }
            let expr = parts.rebase_or_defer(expr.clone());
            if !matches!(expr, Expr::Field(_) | Expr::Aggregate { .. }) {
                parts.defer(DatabaseError::unsupported_projection(format!(
                    "{}.{} = {}",
                    P::shape_name(),
                    field,
                    expr
                )));
            }
            projected.push(ProjectionItem { field, expr });
        }
        parts.projection = Some(Projection {
            shape: P::shape_name(),
            items: projected,
        });
        parts.aggregates.clear();
        QueryModel {
            parts,
            _shape: PhantomData,
        }
    }

    /// Group by the given keys, each exposed under an alias
    #[must_use]
    pub fn group_by(&self, keys: &[(&str, Expr)]) -> Self {
        self.derive(|parts| {
            for (alias, expr) in keys {
                let expr = parts.rebase_or_defer(expr.clone());
                parts.group.push(GroupKey {
                    alias: alias.to_string(),
                    expr,
                });
            }
        })
    }

    /// Add an aggregate exposed under `alias`. `COUNT` takes no selector.
    #[must_use]
    pub fn aggregate(
        &self,
        function: AggregateFunction,
        selector: Option<Expr>,
        alias: impl Into<String>,
    ) -> Self {
        let alias = alias.into();
        self.derive(|parts| {
            let selector = selector.map(|s| parts.rebase_or_defer(s));
            parts.aggregates.push(AggregateDescriptor {
                function,
                selector,
                alias,
            });
        })
    }

    fn push_order(&self, key: Expr, ascending: bool) -> Self {
        self.derive(|parts| {
            let key = parts.rebase_or_defer(key);
            let priority = parts.next_priority();
            parts.orders.push(OrderDescriptor {
                key,
                ascending,
                priority,
            });
        })
    }

    #[must_use]
    pub fn order_by(&self, key: Expr) -> Self {
        self.push_order(key, true)
    }

    #[must_use]
    pub fn order_by_desc(&self, key: Expr) -> Self {
        self.push_order(key, false)
    }

    #[must_use]
    pub fn then_by(&self, key: Expr) -> Self {
        self.push_order(key, true)
    }

    #[must_use]
    pub fn then_by_desc(&self, key: Expr) -> Self {
        self.push_order(key, false)
    }

    /// Add an API-boundary sort option
    #[must_use]
    pub fn sort(&self, option: &SortOption) -> Self {
        self.push_order(Expr::field(option.field.clone()), option.is_ascending())
    }

    #[must_use]
    pub fn clear_ordering(&self) -> Self {
        self.derive(|parts| parts.orders.clear())
    }

    fn paginate(&self, change: impl FnOnce(&mut PaginationDescriptor)) -> Self {
        self.derive(|parts| change(parts.pagination.get_or_insert_with(Default::default)))
    }

    #[must_use]
    pub fn skip(&self, rows: u64) -> Self {
        self.paginate(|p| p.skip = Some(rows))
    }

    #[must_use]
    pub fn take(&self, rows: u64) -> Self {
        self.paginate(|p| p.take = Some(rows))
    }

    /// Request a 1-based page of `page_size` rows
    #[must_use]
    pub fn page(&self, page: u64, page_size: u64) -> Self {
        self.paginate(|p| {
            p.page = Some(page);
            p.page_size = Some(page_size);
        })
    }

    #[must_use]
    pub fn distinct(&self) -> Self {
        self.derive(|parts| parts.distinct = true)
    }

    /// Copy used to count the rows a paged query ranges over
    pub(crate) fn for_count(&self) -> Self {
        self.derive(|parts| {
            parts.orders.clear();
            parts.pagination = None;
        })
    }

    /// Copy without ordering; used where order cannot change the result
    pub(crate) fn without_ordering(&self) -> Self {
        self.clear_ordering()
    }
}
