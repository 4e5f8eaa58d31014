//! Rendering of deduplicating insert statements in BigQuery Standard SQL.
//!
//! Each batch becomes one `INSERT ... SELECT` whose source is an inline array of
//! row structs. Rows already present in the target table for the same
//! `(valueseturi, valuesetversion, system, code)` key are filtered out with a
//! `NOT EXISTS` predicate evaluated by the warehouse, so existing rows are never
//! rewritten and re-running a batch inserts nothing new.
//!
//! Values are rendered as literals because the warehouse capability executes
//! literal SQL without bound parameters.

use crate::models::CodeRow;
use crate::table::{
    CODE_COLUMN, COLUMNS, SYSTEM_COLUMN, TableReference, VALUESET_URI_COLUMN,
    VALUESET_VERSION_COLUMN,
};
use std::fmt::Write;

/// Back-quotes a table reference.
pub fn quote_table(reference: &TableReference) -> String {
    format!("`{}`", reference.to_string().replace('`', "\\`"))
}

/// Renders a BigQuery string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Renders a nullable string literal.
pub fn nullable_literal(value: Option<&str>) -> String {
    value.map(string_literal).unwrap_or_else(|| "NULL".to_string())
}

fn row_tuple(row: &CodeRow) -> String {
    format!(
        "({}, {}, {}, {})",
        string_literal(&row.valueset_uri),
        nullable_literal(row.valueset_version.as_deref()),
        string_literal(&row.system),
        string_literal(&row.code),
    )
}

/// Renders the insert statement for one batch, or `None` for an empty batch.
pub fn insert_statement_for(table: &TableReference, rows: &[CodeRow]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let table_name = quote_table(table);
    let column_list = COLUMNS.join(", ");
    let struct_type = COLUMNS
        .iter()
        .map(|column| format!("{} STRING", column))
        .collect::<Vec<_>>()
        .join(", ");
    let selected = COLUMNS
        .iter()
        .map(|column| format!("codes.{}", column))
        .collect::<Vec<_>>()
        .join(", ");
    let values = rows
        .iter()
        .map(|row| format!("  {}", row_tuple(row)))
        .collect::<Vec<_>>()
        .join(",\n");

    Some(format!(
        "INSERT INTO {table} ({columns})\n\
         SELECT DISTINCT {selected}\n\
         FROM UNNEST(ARRAY<STRUCT<{struct_type}>>[\n{values}\n]) AS codes\n\
         WHERE NOT EXISTS (\n\
         \x20 SELECT 1 FROM {table} AS existing\n\
         \x20 WHERE existing.{uri} = codes.{uri}\n\
         \x20   AND existing.{version} IS NOT DISTINCT FROM codes.{version}\n\
         \x20   AND existing.{system} = codes.{system}\n\
         \x20   AND existing.{code} = codes.{code}\n\
         )",
        table = table_name,
        columns = column_list,
        selected = selected,
        struct_type = struct_type,
        values = values,
        uri = VALUESET_URI_COLUMN,
        version = VALUESET_VERSION_COLUMN,
        system = SYSTEM_COLUMN,
        code = CODE_COLUMN,
    ))
}
