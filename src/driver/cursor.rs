//! Uniform result cursor over native row streams and buffered HTTP results.

use crate::http::RowTable;
use crate::native::{NativeRow, NativeRows};
use crate::value::{FromSqlValue, SqlValue};
use crate::{Error, Result};

/// Forward-only cursor returned by [`DriverCommand::execute_reader`].
///
/// Only one row is current at a time: [`RowRef`] borrows the cursor, so it must be
/// dropped before advancing. Once `next_row` returns `None`, it keeps returning `None`.
///
/// [`DriverCommand::execute_reader`]: super::DriverCommand::execute_reader
#[derive(Debug)]
pub enum ResultCursor<'c> {
    /// Rows pulled from the native engine on demand.
    Native(NativeRows<'c>),
    /// Rows already decoded from an HTTP response.
    Buffered(BufferedRows),
}

/// Cursor state over a [`RowTable`].
#[derive(Debug)]
pub struct BufferedRows {
    table: RowTable,
    next: usize,
}

impl BufferedRows {
    /// Starts before the first row of `table`.
    #[must_use]
    pub const fn new(table: RowTable) -> Self {
        Self { table, next: 0 }
    }

    fn next_row(&mut self) -> Option<RowRef<'_>> {
        let index = self.next;
        if index >= self.table.len() {
            return None;
        }
        self.next += 1;
        self.table.rows().get(index).map(|cells| RowRef::Buffered {
            columns: self.table.columns(),
            cells,
        })
    }
}

impl ResultCursor<'_> {
    /// Number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names().len()
    }

    /// Result column names.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        match self {
            Self::Native(rows) => rows.column_names(),
            Self::Buffered(buffered) => buffered.table.columns(),
        }
    }

    /// Name of the column at `index`.
    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.column_names().get(index).map(String::as_str)
    }

    /// Case-insensitive column lookup.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.column_names()
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Advances to the next row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when a native step fails.
    pub fn next_row(&mut self) -> Result<Option<RowRef<'_>>> {
        match self {
            Self::Native(rows) => Ok(rows.next_row()?.map(RowRef::Native)),
            Self::Buffered(buffered) => Ok(buffered.next_row()),
        }
    }

    /// Rows changed by the statement.
    ///
    /// Buffered results always know it. Native results know it once exhausted, and only
    /// for statements that write.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Native(rows) => rows.rows_affected(),
            Self::Buffered(buffered) => Some(buffered.table.rows_affected()),
        }
    }

    /// Whether the result has any rows at all. Only buffered results can tell in advance.
    #[must_use]
    pub fn has_rows(&self) -> Option<bool> {
        match self {
            Self::Native(_) => None,
            Self::Buffered(buffered) => Some(!buffered.table.is_empty()),
        }
    }

    /// Returns true for results buffered from the HTTP transport.
    #[must_use]
    pub const fn is_buffered(&self) -> bool {
        matches!(self, Self::Buffered(_))
    }

    /// Reads the remaining rows into a table.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn collect_rows(mut self) -> Result<RowTable> {
        let columns = self.column_names().to_vec();
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row.values()?);
        }
        let (rows_affected, last_insert_rowid) = match &self {
            Self::Native(native) => (native.rows_affected().unwrap_or(0), None),
            Self::Buffered(buffered) => (
                buffered.table.rows_affected(),
                buffered.table.last_insert_rowid(),
            ),
        };
        Ok(RowTable::new(columns, rows, rows_affected, last_insert_rowid))
    }

    /// Ends reading and releases the underlying statement, if any.
    pub fn close(self) {
        match self {
            Self::Native(rows) => rows.close(),
            Self::Buffered(_) => {},
        }
    }
}

/// The current row of a [`ResultCursor`].
#[derive(Clone, Copy)]
pub enum RowRef<'r> {
    /// Native row view.
    Native(NativeRow<'r>),
    /// Buffered cells.
    Buffered {
        /// Column names.
        columns: &'r [String],
        /// Cell values.
        cells: &'r [SqlValue],
    },
}

impl RowRef<'_> {
    /// Number of columns.
    #[must_use]
    pub const fn column_count(&self) -> usize {
        match self {
            Self::Native(row) => row.column_count(),
            Self::Buffered { cells, .. } => cells.len(),
        }
    }

    /// Reads a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when `index` is out of range.
    pub fn value(&self, index: usize) -> Result<SqlValue> {
        match self {
            Self::Native(row) => row.value(index),
            Self::Buffered { cells, .. } => cells.get(index).cloned().ok_or_else(|| {
                Error::State(format!(
                    "column ordinal {index} out of range; row has {} column(s)",
                    cells.len()
                ))
            }),
        }
    }

    /// Reads and converts a column.
    ///
    /// # Errors
    ///
    /// See [`RowRef::value`] and [`FromSqlValue::from_sql_value`].
    pub fn get<T: FromSqlValue>(&self, index: usize) -> Result<T> {
        T::from_sql_value(&self.value(index)?)
    }

    /// Reads and converts a column found by case-insensitive name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] for an unknown column, or the conversion error.
    pub fn get_by_name<T: FromSqlValue>(&self, name: &str, columns: &[String]) -> Result<T> {
        let index = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::State(format!("no column named '{name}'")))?;
        self.get(index)
    }

    /// Returns true when the column is `NULL`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when `index` is out of range.
    pub fn is_null(&self, index: usize) -> Result<bool> {
        match self {
            Self::Native(row) => row.is_null(index),
            Self::Buffered { .. } => Ok(self.value(index)?.is_null()),
        }
    }

    /// Reads every column.
    ///
    /// # Errors
    ///
    /// See [`RowRef::value`].
    pub fn values(&self) -> Result<Vec<SqlValue>> {
        match self {
            Self::Native(row) => row.values(),
            Self::Buffered { cells, .. } => Ok(cells.to_vec()),
        }
    }
}

impl std::fmt::Debug for RowRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.values() {
            Ok(values) => f.debug_tuple("RowRef").field(&values).finish(),
            Err(_) => f.write_str("RowRef(<unreadable>)"),
        }
    }
}
