//! Fully materialized query results.

use crate::value::{FromSqlValue, SqlValue};
use crate::{Error, Result};

/// Rows decoded from a pipeline response, or collected from any cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowTable {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    rows_affected: u64,
    last_insert_rowid: Option<i64>,
}

impl RowTable {
    /// Creates a table.
    #[must_use]
    pub const fn new(
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
        rows_affected: u64,
        last_insert_rowid: Option<i64>,
    ) -> Self {
        Self {
            columns,
            rows,
            rows_affected,
            last_insert_rowid,
        }
    }

    /// Column names, in order. Unnamed columns are empty strings.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, each with one cell per column.
    #[must_use]
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    /// Consumes the table, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<SqlValue>> {
        self.rows
    }

    /// Rows changed by the statement.
    #[must_use]
    pub const fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Rowid of the last insert, when the server reported one.
    #[must_use]
    pub const fn last_insert_rowid(&self) -> Option<i64> {
        self.last_insert_rowid
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// First column of the first row, if any.
    #[must_use]
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Reads and converts one cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when the cell does not exist, or the conversion error.
    pub fn get<T: FromSqlValue>(&self, row: usize, column: usize) -> Result<T> {
        let cell = self
            .rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .ok_or_else(|| Error::State(format!("no cell at row {row}, column {column}")))?;
        T::from_sql_value(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RowTable {
        RowTable::new(
            vec!["Id".into(), "name".into()],
            vec![
                vec![SqlValue::Integer(1), SqlValue::Text("Alice".into())],
                vec![SqlValue::Integer(2), SqlValue::Null],
            ],
            0,
            None,
        )
    }

    #[test]
    fn test_ordinal_is_case_insensitive() {
        let table = table();
        assert_eq!(table.ordinal("id"), Some(0));
        assert_eq!(table.ordinal("NAME"), Some(1));
        assert_eq!(table.ordinal("missing"), None);
    }

    #[test]
    fn test_cell_access() {
        let table = table();
        assert_eq!(table.scalar(), Some(&SqlValue::Integer(1)));
        assert_eq!(table.get::<String>(0, 1).unwrap(), "Alice");
        assert_eq!(table.get::<Option<String>>(1, 1).unwrap(), None);
        assert!(matches!(table.get::<i64>(5, 0), Err(Error::State(_))));
        assert_eq!(table.len(), 2);
        assert!(RowTable::default().is_empty());
    }
}
