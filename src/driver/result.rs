//! Result sets and execution outcomes.
//!
//! The simple query protocol returns every value in text format, so
//! values are exposed as text with raw-byte access alongside.

use std::borrow::Cow;
use std::collections::HashMap;

use super::{PgError, PgResult};
use crate::protocol::{ErrorFields, FieldDescription};

/// Raw row values as received in DataRow messages. `None` is SQL NULL.
pub(crate) type RawRow = Vec<Option<Vec<u8>>>;

/// Column metadata from RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Zero-based position in the row.
    pub position: usize,
    pub type_oid: u32,
    /// 0 = text, 1 = binary
    pub format: i16,
}

impl Column {
    pub(crate) fn from_field(position: usize, field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            position,
            type_oid: field.type_oid,
            format: field.format,
        }
    }
}

/// Rows and column metadata from one execution, fully materialized.
///
/// Every row has exactly `column_count()` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<RawRow>,
    name_to_index: HashMap<String, usize>,
}

impl ResultSet {
    /// Callers must have checked every row's width against `columns`.
    pub(crate) fn new(columns: Vec<Column>, rows: Vec<RawRow>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        let mut name_to_index = HashMap::with_capacity(columns.len());
        for column in &columns {
            // First occurrence wins for duplicate names, as in libpq
            name_to_index
                .entry(column.name.clone())
                .or_insert(column.position);
        }
        Self {
            columns,
            rows,
            name_to_index,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column name at `column`, if in range.
    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.columns.get(column).map(|c| c.name.as_str())
    }

    /// Position of the first column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Value at (`row`, `column`) as text. `Ok(None)` is SQL NULL.
    ///
    /// Non-UTF-8 bytes are replaced with U+FFFD; use [`bytes_at`](Self::bytes_at)
    /// for the raw value.
    pub fn value_at(&self, row: usize, column: usize) -> PgResult<Option<Cow<'_, str>>> {
        Ok(self
            .bytes_at(row, column)?
            .map(String::from_utf8_lossy))
    }

    /// Raw bytes at (`row`, `column`). `Ok(None)` is SQL NULL.
    pub fn bytes_at(&self, row: usize, column: usize) -> PgResult<Option<&[u8]>> {
        let value = self
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .ok_or(PgError::Index {
                row,
                column,
                rows: self.rows.len(),
                columns: self.columns.len(),
            })?;
        Ok(value.as_deref())
    }

    pub fn is_null(&self, row: usize, column: usize) -> PgResult<bool> {
        Ok(self.bytes_at(row, column)?.is_none())
    }

    /// Borrowed view of one row.
    pub fn row(&self, row: usize) -> PgResult<Row<'_>> {
        if row >= self.rows.len() {
            return Err(PgError::Index {
                row,
                column: 0,
                rows: self.rows.len(),
                columns: self.columns.len(),
            });
        }
        Ok(Row { set: self, index: row })
    }

    /// Iterate over rows in order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> + '_ {
        (0..self.rows.len()).map(move |index| Row { set: self, index })
    }
}

/// One row of a [`ResultSet`].
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    set: &'a ResultSet,
    index: usize,
}

impl<'a> Row<'a> {
    /// Position of this row in its result set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.set.column_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text value of `column`. `Ok(None)` is SQL NULL.
    pub fn get(&self, column: usize) -> PgResult<Option<Cow<'a, str>>> {
        self.set.value_at(self.index, column)
    }

    /// Text value of the column called `name`; `None` if no such column or NULL.
    pub fn get_by_name(&self, name: &str) -> Option<Cow<'a, str>> {
        let column = self.set.column_index(name)?;
        self.get(column).ok().flatten()
    }

    /// All values of the row in column order.
    pub fn values(&self) -> impl Iterator<Item = Option<Cow<'a, str>>> + 'a {
        let set = self.set;
        set.rows[self.index]
            .iter()
            .map(|v| v.as_deref().map(String::from_utf8_lossy))
    }
}

/// The result of running one statement string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The statement produced rows (SELECT, FETCH, SHOW, ... RETURNING).
    RowsReturned(ResultSet),
    /// The statement completed without a row description.
    CommandCompleted {
        /// Command tag, e.g. `INSERT 0 1`, `BEGIN`, `DECLARE CURSOR`.
        tag: String,
        /// Rows affected, parsed from the tag (0 when it carries no count).
        affected: u64,
    },
    /// The server rejected the statement. The connection stays usable.
    Failed(ErrorFields),
}

impl ExecutionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_))
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            ExecutionOutcome::RowsReturned(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            ExecutionOutcome::RowsReturned(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorFields> {
        match self {
            ExecutionOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Rows affected for commands, rows returned for queries.
    pub fn affected(&self) -> u64 {
        match self {
            ExecutionOutcome::RowsReturned(rs) => rs.row_count() as u64,
            ExecutionOutcome::CommandCompleted { affected, .. } => *affected,
            ExecutionOutcome::Failed(_) => 0,
        }
    }
}
