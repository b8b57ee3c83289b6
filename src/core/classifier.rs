//! Storage error classification
//!
//! Storage engines report failures as free text. [`classify`] turns that text into a
//! [`DatabaseError`] kind so callers can branch on constraint violations, timeouts and
//! contention without parsing messages themselves. SQL Server, PostgreSQL and SQLite
//! message shapes are recognized.

use super::error::{ConstraintKind, DatabaseError};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// One recognizable constraint message shape.
///
/// A pattern captures either `name` (a quoted constraint or column name) or
/// `columns` (a SQLite `Table.Column, ...` list). Both are optional so a truncated
/// message still classifies, with an empty name.
struct ConstraintPattern {
    kind: ConstraintKind,
    regex: Regex,
}

fn pattern(kind: ConstraintKind, source: &str) -> ConstraintPattern {
    ConstraintPattern {
        kind,
        regex: Regex::new(source).unwrap(),
    }
}

// Order is priority order.
static CONSTRAINT_PATTERNS: LazyLock<Vec<ConstraintPattern>> = LazyLock::new(|| {
    vec![
        // Primary key
        pattern(
            ConstraintKind::PrimaryKey,
            r#"(?i)\bviolation of primary key constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::PrimaryKey,
            r"(?i)\bprimary key constraint failed(?::[ \t]*(?P<columns>[^\r\n]*))?",
        ),
        // Unique
        pattern(
            ConstraintKind::Unique,
            r#"(?i)\bviolation of unique key constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::Unique,
            r#"(?i)\bcannot insert duplicate key row\b(?:.*?\bunique index\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::Unique,
            r#"(?i)\bduplicate key value violates unique constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::Unique,
            r"(?i)\bunique constraint failed(?::[ \t]*(?P<columns>[^\r\n]*))?",
        ),
        // Foreign key
        pattern(
            ConstraintKind::ForeignKey,
            r#"(?i)\bconflicted with the (?:foreign key|reference) constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::ForeignKey,
            r#"(?i)\bviolates foreign key constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(ConstraintKind::ForeignKey, r"(?i)\bforeign key constraint failed\b"),
        // Check
        pattern(
            ConstraintKind::Check,
            r#"(?i)\b(?:conflicted with the|violates) check constraint(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::Check,
            r"(?i)\bcheck constraint failed(?::[ \t]*(?P<columns>[^\r\n]*))?",
        ),
        // Not null
        pattern(
            ConstraintKind::NotNull,
            r#"(?i)\bcannot insert the value null into column(?:\s*['"](?P<name>[^'"]*)['"])?"#,
        ),
        pattern(
            ConstraintKind::NotNull,
            r#"(?i)(?:\bnull value in column\s*"(?P<name>[^"]*)"[^\r\n]*?)?\bviolates not-null constraint"#,
        ),
        pattern(
            ConstraintKind::NotNull,
            r"(?i)\bnot null constraint failed(?::[ \t]*(?P<columns>[^\r\n]*))?",
        ),
    ]
});

static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:timeout expired|timed out|statement timeout|lock timeout|lock request time out period exceeded)\b",
    )
    .unwrap()
});

static CONCURRENCY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:deadlock(?:ed)?|could not serialize access|serialization failure|database (?:table )?is locked)\b",
    )
    .unwrap()
});

static UNAVAILABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:connection (?:refused|reset|closed|lost|failure|failed|timed out|is broken)|network-related|transport-level error|unable to open database|server was not found|server closed the connection)\b",
    )
    .unwrap()
});

/// Classify free-form storage error text.
///
/// Constraint shapes are tried first (primary key before unique, since SQL Server
/// reports both with "duplicate key" wording), then timeouts, contention and outages.
/// Anything unrecognized becomes [`DatabaseError::Repository`] carrying the original
/// text.
pub fn classify(message: &str) -> DatabaseError {
    for pattern in CONSTRAINT_PATTERNS.iter() {
        if let Some(captures) = pattern.regex.captures(message) {
            return DatabaseError::constraint(pattern.kind, captured_name(&captures));
        }
    }

    if TIMEOUT_PATTERN.is_match(message) {
        return DatabaseError::timeout(message);
    }
    if CONCURRENCY_PATTERN.is_match(message) {
        return DatabaseError::concurrency(message);
    }
    if UNAVAILABLE_PATTERN.is_match(message) {
        return DatabaseError::unavailable(message);
    }

    log::error!("unclassified storage error: {}", message);
    DatabaseError::repository(message)
}

fn captured_name(captures: &Captures<'_>) -> String {
    if let Some(name) = captures.name("name") {
        return name.as_str().to_string();
    }
    captures
        .name("columns")
        .map(|columns| column_list(columns.as_str()))
        .unwrap_or_default()
}

/// `Users.Email, Users.Tenant` becomes `Email, Tenant`
fn column_list(text: &str) -> String {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.rsplit('.').next().unwrap_or(part))
        .collect::<Vec<_>>()
        .join(", ")
}
