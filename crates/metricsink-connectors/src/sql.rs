//! SQL statement construction for the metrics table.
//!
//! All statements are parameterized: values travel as `$n` bind arguments
//! with an explicit cast to the destination column type, never as inline
//! literals. Identifiers (schema, table, owner, column names) are validated
//! against a conservative pattern before they are spliced into statement
//! text — this module owns those rules for the whole crate.

use crate::error::{ConnectorError, Result};
use crate::record::MappedRow;

/// Destination columns with their SQL types, in declaration order.
///
/// `response_time` is an interval with millisecond precision.
pub const DEST_COLUMNS: [(&str, &str); 8] = [
    ("time_stamp", "timestamp"),
    ("url", "text"),
    ("agent", "text"),
    ("response_time", "interval(3)"),
    ("status_code", "integer"),
    ("ip", "text"),
    ("content_validation", "boolean"),
    ("comment", "text"),
];

/// Columns the service filters on; each gets an index at creation time.
pub const INDEXED_COLUMNS: [&str; 6] = [
    "url",
    "status_code",
    "agent",
    "response_time",
    "ip",
    "comment",
];

/// A parameterized statement: SQL text plus bind arguments in `$n` order.
/// `None` arguments bind as SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Option<String>>,
}

/// A schema-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: String,
    table: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        Ok(Self {
            schema: ident(schema)?.to_string(),
            table: ident(table)?.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `schema.table` form used in statement text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Build a batch INSERT with a `RETURNING *` clause.
///
/// Returns `Ok(None)` for an empty row list — a no-op, distinct from an
/// error; the caller logs a warning and skips execution. Column order is
/// taken from the first row; rows with a differing column set are rejected
/// with `GuardError` rather than producing malformed SQL.
pub fn build_insert(table: &TableRef, rows: &[MappedRow]) -> Result<Option<Statement>> {
    let first = match rows.first() {
        Some(row) => row,
        None => return Ok(None),
    };

    let columns = first.column_names();
    for (i, row) in rows.iter().enumerate().skip(1) {
        if row.column_names() != columns {
            return Err(ConnectorError::GuardError(format!(
                "row {} has a different column set than the first row",
                i
            )));
        }
    }

    let col_list = columns.join(", ");
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table.qualified(), col_list);
    let mut args = Vec::with_capacity(rows.len() * columns.len());

    for (row_idx, row) in rows.iter().enumerate() {
        if row_idx > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (col_idx, (column, value)) in columns.iter().zip(row.values()).enumerate() {
            if col_idx > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&placeholder(args.len() + 1, column));
            args.push(value.as_bind());
        }
        sql.push(')');
    }

    sql.push_str(" RETURNING *");
    Ok(Some(Statement { sql, args }))
}

/// Build a DELETE constrained by the given filter criteria, with a
/// `RETURNING *` clause.
///
/// # Errors
///
/// `GuardError` when `filters` is empty: an unconditional delete must never
/// be constructible through this path, regardless of caller intent.
pub fn build_delete(table: &TableRef, filters: &[(String, String)]) -> Result<Statement> {
    if filters.is_empty() {
        return Err(ConnectorError::GuardError(
            "delete with no filter criteria refused; this would wipe the whole table".to_string(),
        ));
    }

    let mut sql = format!("DELETE FROM {} WHERE ", table.qualified());
    let mut args = Vec::with_capacity(filters.len());

    for (i, (column, value)) in filters.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let column = ident(column)?;
        sql.push_str(&format!("{} = {}", column, placeholder(i + 1, column)));
        args.push(Some(value.clone()));
    }

    sql.push_str(" RETURNING *");
    Ok(Statement { sql, args })
}

/// Build the idempotent schema/table/index creation sequence.
///
/// Every statement carries `IF NOT EXISTS`, so running the sequence twice
/// leaves the destination in the same state as running it once.
pub fn build_create_table(schema: &str, table: &str, owner: &str) -> Result<Vec<String>> {
    let table = TableRef::new(schema, table)?;
    let owner = ident(owner)?;

    let mut statements = Vec::with_capacity(2 + INDEXED_COLUMNS.len());
    statements.push(format!(
        "CREATE SCHEMA IF NOT EXISTS {} AUTHORIZATION {}",
        table.schema(),
        owner
    ));

    let column_defs: Vec<String> = DEST_COLUMNS
        .iter()
        .map(|(name, sql_type)| format!("{} {}", name, sql_type))
        .collect();
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.qualified(),
        column_defs.join(", ")
    ));

    for column in INDEXED_COLUMNS {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({})",
            table.table(),
            column,
            table.qualified(),
            column
        ));
    }

    Ok(statements)
}

/// `$n` placeholder with a cast to the column's declared type, so text
/// bind arguments land in typed columns. Unknown columns bind uncast.
fn placeholder(n: usize, column: &str) -> String {
    match cast_for(column) {
        Some(sql_type) => format!("${}::{}", n, sql_type),
        None => format!("${}", n),
    }
}

fn cast_for(column: &str) -> Option<&'static str> {
    DEST_COLUMNS
        .iter()
        .copied()
        .find(|(name, _)| *name == column)
        // interval(3) is a column constraint; the cast form is plain.
        .map(|(_, sql_type)| sql_type.split_once('(').map_or(sql_type, |(base, _)| base))
}

/// Validate an identifier: letters, digits and underscores, not starting
/// with a digit. Rejection is a guard failure — identifiers come from
/// configuration, never from event payloads.
fn ident(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(ConnectorError::GuardError(format!(
            "invalid SQL identifier: '{}'",
            name
        )))
    }
}
