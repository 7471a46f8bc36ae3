//! Text and JSON rendering of result sets.

use std::fmt::Write;

use serde_json::{Map, Value};

use crate::driver::ResultSet;

/// Width every cell is left-padded to in table output.
pub const CELL_WIDTH: usize = 15;

/// Column names, a blank line, then one line per row.
///
/// Cells are padded to [`CELL_WIDTH`] but never truncated; NULL prints as
/// an empty cell.
pub fn render_table(rows: &ResultSet) -> String {
    let mut out = String::new();
    for column in rows.columns() {
        let _ = write!(out, "{:<width$}", column.name, width = CELL_WIDTH);
    }
    out.push_str("\n\n");

    for row in rows.rows() {
        for value in row.values() {
            let _ = write!(
                out,
                "{:<width$}",
                value.as_deref().unwrap_or(""),
                width = CELL_WIDTH
            );
        }
        out.push('\n');
    }
    out
}

/// One JSON object per row, keyed by column name. NULL becomes `null`.
///
/// For duplicate column names the last column wins.
pub fn to_json(rows: &ResultSet) -> Value {
    let records = rows
        .rows()
        .map(|row| {
            let mut record = Map::new();
            for (column, value) in rows.columns().iter().zip(row.values()) {
                let value = match value {
                    Some(text) => Value::String(text.into_owned()),
                    None => Value::Null,
                };
                record.insert(column.name.clone(), value);
            }
            Value::Object(record)
        })
        .collect();
    Value::Array(records)
}
