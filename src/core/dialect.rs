//! SQL dialect descriptor
//!
//! Generated SQL follows one dialect: bracket-quoted identifiers, `@pN` parameters,
//! `OFFSET … FETCH` paging and `OUTPUT INSERTED` key retrieval. SQLite accepts most
//! of that text unchanged; this module covers the clauses where it does not.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

/// Target dialect of generated statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SqlDialect {
    /// `OFFSET n ROWS FETCH NEXT m ROWS ONLY`, `OUTPUT INSERTED.[k]`
    #[default]
    SqlServer,
    /// `LIMIT m OFFSET n`, `RETURNING [k]`
    Sqlite,
}

impl SqlDialect {
    /// Convert dialect to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            SqlDialect::SqlServer => "sqlserver",
            SqlDialect::Sqlite => "sqlite",
        }
    }

    /// Most parameters one statement may bind
    ///
    /// SQL Server refuses more than 2100; a margin is kept for parameters the
    /// caller's own clauses add.
    pub fn max_parameters(&self) -> usize {
        match self {
            SqlDialect::SqlServer => 2000,
            SqlDialect::Sqlite => 32766,
        }
    }

    /// Append the paging clause for a normalized window
    pub fn write_pagination(&self, sql: &mut String, skip: u64, take: Option<u64>) {
        match self {
            SqlDialect::SqlServer => {
                let _ = write!(sql, " OFFSET {skip} ROWS");
                if let Some(take) = take {
                    let _ = write!(sql, " FETCH NEXT {take} ROWS ONLY");
                }
            }
            SqlDialect::Sqlite => match take {
                Some(take) => {
                    let _ = write!(sql, " LIMIT {take} OFFSET {skip}");
                }
                None => {
                    let _ = write!(sql, " LIMIT -1 OFFSET {skip}");
                }
            },
        }
    }

    /// Clause placed between the column list and `VALUES` of an insert
    pub fn output_clause(&self, column: &str) -> Option<String> {
        match self {
            SqlDialect::SqlServer => Some(format!(" OUTPUT INSERTED.{}", quote_ident(column))),
            SqlDialect::Sqlite => None,
        }
    }

    /// Clause appended after the `VALUES` list of an insert
    pub fn returning_clause(&self, column: &str) -> Option<String> {
        match self {
            SqlDialect::SqlServer => None,
            SqlDialect::Sqlite => Some(format!(" RETURNING {}", quote_ident(column))),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlserver" | "mssql" | "tsql" => Ok(SqlDialect::SqlServer),
            "sqlite" | "sqlite3" => Ok(SqlDialect::Sqlite),
            _ => Err(format!("Invalid SQL dialect: '{}'", s)),
        }
    }
}

/// Quote an identifier with brackets, doubling any closing bracket
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('[');
    for ch in name.chars() {
        if ch == ']' {
            quoted.push(']');
        }
        quoted.push(ch);
    }
    quoted.push(']');
    quoted
}

/// `[alias].[column]`
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}
