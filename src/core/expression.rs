//! Predicate and selector expressions
//!
//! Queries describe filters, join conditions, sort keys and projections as an
//! [`Expr`] tree. Trees are built with the typed builder methods on [`Expr`] or
//! lowered from API-boundary filters; the translator turns them into SQL. Nothing
//! in a tree is ever evaluated in-process.

use super::convert::ToDbValue;
use super::error::Result;
use super::metadata::ShapeId;
use super::row_mapper::Shape;
use super::value::DatabaseValue;
use std::fmt;

/// Which table a field reference points at
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// The query's working shape: the base entity, or the projection after `select`
    Current,
    /// The first table of this entity shape in the query
    Shape(ShapeId),
    /// The table bound to this alias
    Alias(String),
}

/// A field of some table
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub table: TableRef,
    pub field: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            TableRef::Current => write!(f, "{}", self.field),
            TableRef::Shape(shape) => write!(f, "{}.{}", shape, self.field),
            TableRef::Alias(alias) => write!(f, "{}.{}", alias, self.field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterOrEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::AndAlso | BinaryOperator::OrElse)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterOrEqual => ">=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessOrEqual => "<=",
            BinaryOperator::AndAlso => "&&",
            BinaryOperator::OrElse => "||",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
        }
    }
}

/// Method applied to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodKind {
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    /// Any other method; has no SQL translation
    Other(String),
}

impl MethodKind {
    pub fn name(&self) -> &str {
        match self {
            MethodKind::Contains => "contains",
            MethodKind::StartsWith => "starts_with",
            MethodKind::EndsWith => "ends_with",
            MethodKind::IsNull => "is_null",
            MethodKind::IsNotNull => "is_not_null",
            MethodKind::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub fn to_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldRef),
    Constant(DatabaseValue),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        method: MethodKind,
        target: Box<Expr>,
        argument: Option<Box<Expr>>,
    },
    Not(Box<Expr>),
    Aggregate {
        function: AggregateFunction,
        argument: Option<Box<Expr>>,
    },
}

/// Anything usable as the right-hand side of a comparison
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl<T: ToDbValue> IntoExpr for T {
    fn into_expr(self) -> Expr {
        Expr::Constant(self.to_db_value())
    }
}

impl Expr {
    /// Field of the working shape
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(FieldRef {
            table: TableRef::Current,
            field: name.into(),
        })
    }

    /// Field of the first table of entity `S`
    pub fn field_of<S: Shape>(name: impl Into<String>) -> Self {
        Expr::Field(FieldRef {
            table: TableRef::Shape(ShapeId::of::<S>()),
            field: name.into(),
        })
    }

    /// Field of the table bound to `alias`
    pub fn aliased(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Field(FieldRef {
            table: TableRef::Alias(alias.into()),
            field: name.into(),
        })
    }

    pub fn value(value: impl ToDbValue) -> Self {
        Expr::Constant(value.to_db_value())
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(self, op: BinaryOperator, other: impl IntoExpr) -> Self {
        Expr::binary(op, self, other.into_expr())
    }

    #[must_use]
    pub fn eq(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::Equal, other)
    }

    #[must_use]
    pub fn ne(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::NotEqual, other)
    }

    #[must_use]
    pub fn gt(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::GreaterThan, other)
    }

    #[must_use]
    pub fn ge(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::GreaterOrEqual, other)
    }

    #[must_use]
    pub fn lt(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::LessThan, other)
    }

    #[must_use]
    pub fn le(self, other: impl IntoExpr) -> Self {
        self.compare(BinaryOperator::LessOrEqual, other)
    }

    #[must_use]
    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOperator::AndAlso, self, other)
    }

    #[must_use]
    pub fn or_else(self, other: Expr) -> Self {
        Expr::binary(BinaryOperator::OrElse, self, other)
    }

    #[must_use]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    fn call(self, method: MethodKind, argument: Option<Expr>) -> Self {
        Expr::Call {
            method,
            target: Box::new(self),
            argument: argument.map(Box::new),
        }
    }

    #[must_use]
    pub fn contains(self, text: impl IntoExpr) -> Self {
        self.call(MethodKind::Contains, Some(text.into_expr()))
    }

    #[must_use]
    pub fn starts_with(self, text: impl IntoExpr) -> Self {
        self.call(MethodKind::StartsWith, Some(text.into_expr()))
    }

    #[must_use]
    pub fn ends_with(self, text: impl IntoExpr) -> Self {
        self.call(MethodKind::EndsWith, Some(text.into_expr()))
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        self.call(MethodKind::IsNull, None)
    }

    #[must_use]
    pub fn is_not_null(self) -> Self {
        self.call(MethodKind::IsNotNull, None)
    }

    /// Arbitrary method call. Kept in the tree so translation can reject it.
    #[must_use]
    pub fn method(self, name: impl Into<String>, argument: Option<Expr>) -> Self {
        self.call(MethodKind::Other(name.into()), argument)
    }

    pub fn aggregate(function: AggregateFunction, argument: Option<Expr>) -> Self {
        Expr::Aggregate {
            function,
            argument: argument.map(Box::new),
        }
    }

    /// `COUNT(*)`
    pub fn count_all() -> Self {
        Expr::aggregate(AggregateFunction::Count, None)
    }

    #[must_use]
    pub fn count(self) -> Self {
        Expr::aggregate(AggregateFunction::Count, Some(self))
    }

    #[must_use]
    pub fn sum(self) -> Self {
        Expr::aggregate(AggregateFunction::Sum, Some(self))
    }

    #[must_use]
    pub fn min(self) -> Self {
        Expr::aggregate(AggregateFunction::Min, Some(self))
    }

    #[must_use]
    pub fn max(self) -> Self {
        Expr::aggregate(AggregateFunction::Max, Some(self))
    }

    #[must_use]
    pub fn avg(self) -> Self {
        Expr::aggregate(AggregateFunction::Avg, Some(self))
    }

    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            Expr::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Whether an aggregate appears anywhere in the tree
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Field(_) | Expr::Constant(_) => false,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Call {
                target, argument, ..
            } => {
                target.contains_aggregate()
                    || argument.as_ref().is_some_and(|a| a.contains_aggregate())
            }
            Expr::Not(inner) => inner.contains_aggregate(),
        }
    }

    /// Rebuild the tree, replacing every field reference with `f(field)`.
    pub fn map_fields<F>(&self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(&FieldRef) -> Result<Expr>,
    {
        Ok(match self {
            Expr::Field(field) => f(field)?,
            Expr::Constant(value) => Expr::Constant(value.clone()),
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.map_fields(f)?),
                right: Box::new(right.map_fields(f)?),
            },
            Expr::Call {
                method,
                target,
                argument,
            } => Expr::Call {
                method: method.clone(),
                target: Box::new(target.map_fields(f)?),
                argument: match argument {
                    Some(a) => Some(Box::new(a.map_fields(f)?)),
                    None => None,
                },
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.map_fields(f)?)),
            Expr::Aggregate { function, argument } => Expr::Aggregate {
                function: *function,
                argument: match argument {
                    Some(a) => Some(Box::new(a.map_fields(f)?)),
                    None => None,
                },
            },
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(field) => write!(f, "{field}"),
            Expr::Constant(value) => write!(f, "{}", value.as_string()),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Call {
                method,
                target,
                argument: Some(argument),
            } => write!(f, "{target}.{}({argument})", method.name()),
            Expr::Call { method, target, .. } => write!(f, "{target}.{}()", method.name()),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Aggregate {
                function,
                argument: Some(argument),
            } => write!(f, "{}({argument})", function.to_str()),
            Expr::Aggregate { function, .. } => write!(f, "{}(*)", function.to_str()),
        }
    }
}
