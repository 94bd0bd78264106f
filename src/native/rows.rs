//! Pull-based row iteration over an executing statement.
//!
//! The C ABI has no separate row-set or row allocation: a row set is an executing
//! statement, and a row is the statement's current position. [`NativeRows`] takes the
//! statement (owned or borrowed) for as long as rows are being read, and [`NativeRow`]
//! borrows the row set, so advancing invalidates the previous row at compile time.

use std::ffi::{c_int, c_void};
use std::ops::{Deref, DerefMut};

use rusqlite::ffi;
use tracing::trace;

use super::statement::{ChangeMark, NativeStatement};
use crate::value::{FromSqlValue, SqlType, SqlValue};
use crate::{Error, Result};

/// Where the executing statement lives while rows are read.
enum StatementSlot<'s> {
    /// Ephemeral statement, finalized on release.
    Owned(NativeStatement),
    /// Caller-prepared statement, reset on release.
    Borrowed(&'s mut NativeStatement),
}

impl Deref for StatementSlot<'_> {
    type Target = NativeStatement;

    fn deref(&self) -> &NativeStatement {
        match self {
            Self::Owned(stmt) => stmt,
            Self::Borrowed(stmt) => stmt,
        }
    }
}

impl DerefMut for StatementSlot<'_> {
    fn deref_mut(&mut self) -> &mut NativeStatement {
        match self {
            Self::Owned(stmt) => stmt,
            Self::Borrowed(stmt) => stmt,
        }
    }
}

/// Forward-only cursor over a native result.
///
/// Once [`NativeRows::next_row`] has returned `None`, it keeps returning `None`.
pub struct NativeRows<'s> {
    slot: Option<StatementSlot<'s>>,
    columns: Vec<String>,
    pending: bool,
    mark: ChangeMark,
    rows_affected: Option<u64>,
}

impl<'s> NativeRows<'s> {
    pub(crate) fn borrowed(stmt: &'s mut NativeStatement) -> Result<Self> {
        Self::start(StatementSlot::Borrowed(stmt))
    }

    pub(crate) fn owned(stmt: NativeStatement) -> Result<Self> {
        Self::start(StatementSlot::Owned(stmt))
    }

    fn start(mut slot: StatementSlot<'s>) -> Result<Self> {
        let columns = slot.column_names();
        let mark = ChangeMark::take(slot.connection());
        let first = slot.step();
        let mut rows = Self {
            slot: Some(slot),
            columns,
            pending: false,
            mark,
            rows_affected: None,
        };
        match first {
            Ok(true) => rows.pending = true,
            Ok(false) => rows.finish(),
            Err(err) => {
                rows.finish();
                return Err(err);
            },
        }
        Ok(rows)
    }

    /// Result column names.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Rows changed by the statement, known once the cursor is exhausted and only for
    /// statements that write.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Returns true once end-of-rows has been reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.slot.is_none()
    }

    /// Advances to the next row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when a step fails; the cursor is exhausted afterwards.
    pub fn next_row(&mut self) -> Result<Option<NativeRow<'_>>> {
        if self.pending {
            self.pending = false;
            return Ok(self.current());
        }
        let Some(slot) = self.slot.as_mut() else {
            return Ok(None);
        };
        match slot.step() {
            Ok(true) => {
                trace!("Native row stepped");
                Ok(self.current())
            },
            Ok(false) => {
                self.finish();
                Ok(None)
            },
            Err(err) => {
                self.finish();
                Err(err)
            },
        }
    }

    fn current(&self) -> Option<NativeRow<'_>> {
        self.slot.as_deref().map(|stmt| NativeRow {
            stmt,
            columns: &self.columns,
        })
    }

    /// Releases the statement: a borrowed one is reset, an owned one is finalized.
    fn finish(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if !slot.is_readonly() {
            self.rows_affected = Some(self.mark.rows_affected(slot.connection()));
        }
        match slot {
            StatementSlot::Owned(stmt) => stmt.finalize(),
            StatementSlot::Borrowed(stmt) => stmt.reset(),
        }
        self.pending = false;
        trace!("Native row set released");
    }

    /// Ends iteration early and releases the statement.
    pub fn close(mut self) {
        self.finish();
    }
}

impl Drop for NativeRows<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for NativeRows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRows")
            .field("columns", &self.columns)
            .field("exhausted", &self.is_exhausted())
            .finish_non_exhaustive()
    }
}

/// The current row of a [`NativeRows`] cursor.
#[derive(Clone, Copy)]
pub struct NativeRow<'r> {
    stmt: &'r NativeStatement,
    columns: &'r [String],
}

impl NativeRow<'_> {
    /// Number of columns.
    #[must_use]
    pub const fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn ordinal(&self, index: usize) -> Result<c_int> {
        if index >= self.columns.len() {
            return Err(Error::State(format!(
                "column ordinal {index} out of range; row has {} column(s)",
                self.columns.len()
            )));
        }
        c_int::try_from(index).map_err(|_| Error::State(format!("column ordinal {index} overflow")))
    }

    /// Storage class of a column in this row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when `index` is out of range.
    pub fn column_type(&self, index: usize) -> Result<SqlType> {
        let ordinal = self.ordinal(index)?;
        // SAFETY: the statement is positioned on a row and `ordinal` is in range.
        let tag = unsafe { ffi::sqlite3_column_type(self.stmt.as_ptr(), ordinal) };
        Ok(match tag {
            ffi::SQLITE_INTEGER => SqlType::Integer,
            ffi::SQLITE_FLOAT => SqlType::Real,
            ffi::SQLITE_TEXT => SqlType::Text,
            ffi::SQLITE_BLOB => SqlType::Blob,
            _ => SqlType::Null,
        })
    }

    /// Reads a column, selecting the getter by the column's type tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when `index` is out of range, or [`Error::Conversion`]
    /// when TEXT is not valid UTF-8.
    pub fn value(&self, index: usize) -> Result<SqlValue> {
        let sql_type = self.column_type(index)?;
        let ordinal = self.ordinal(index)?;
        let stmt = self.stmt.as_ptr();
        // SAFETY: the statement is positioned on a row and `ordinal` is in range. For TEXT
        // and BLOB the pointer is fetched before the byte count, and both are copied out
        // before any further call on the statement.
        unsafe {
            Ok(match sql_type {
                SqlType::Null => SqlValue::Null,
                SqlType::Integer => SqlValue::Integer(ffi::sqlite3_column_int64(stmt, ordinal)),
                SqlType::Real => SqlValue::Real(ffi::sqlite3_column_double(stmt, ordinal)),
                SqlType::Text => {
                    let text = ffi::sqlite3_column_text(stmt, ordinal);
                    let bytes = column_bytes(text.cast::<c_void>(), stmt, ordinal);
                    SqlValue::Text(String::from_utf8(bytes).map_err(|e| {
                        Error::Conversion(format!("column {index} is not valid UTF-8: {e}"))
                    })?)
                },
                SqlType::Blob => {
                    let blob = ffi::sqlite3_column_blob(stmt, ordinal);
                    SqlValue::Blob(column_bytes(blob, stmt, ordinal))
                },
            })
        }
    }

    /// Reads and converts a column.
    ///
    /// # Errors
    ///
    /// See [`NativeRow::value`] and [`FromSqlValue::from_sql_value`].
    pub fn get<T: FromSqlValue>(&self, index: usize) -> Result<T> {
        T::from_sql_value(&self.value(index)?)
    }

    /// Returns true when the column is `NULL`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when `index` is out of range.
    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.column_type(index)? == SqlType::Null)
    }

    /// Reads every column of the row.
    ///
    /// # Errors
    ///
    /// See [`NativeRow::value`].
    pub fn values(&self) -> Result<Vec<SqlValue>> {
        (0..self.columns.len()).map(|i| self.value(i)).collect()
    }
}

/// Copies `sqlite3_column_bytes` bytes from `data`.
///
/// # Safety
///
/// `data` must be the pointer just returned for `ordinal` by a text or blob getter.
unsafe fn column_bytes(data: *const c_void, stmt: *mut ffi::sqlite3_stmt, ordinal: c_int) -> Vec<u8> {
    // SAFETY: per the caller's contract.
    let len = unsafe { ffi::sqlite3_column_bytes(stmt, ordinal) };
    let len = usize::try_from(len).unwrap_or(0);
    if data.is_null() || len == 0 {
        return Vec::new();
    }
    // SAFETY: the engine guarantees `len` readable bytes at `data` until the next step.
    unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) }.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeConnection, NativeTarget};
    use std::sync::Arc;

    fn seeded() -> Arc<NativeConnection> {
        let conn = Arc::new(NativeConnection::open_default(&NativeTarget::Memory).unwrap());
        conn.execute_batch(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB);
             INSERT INTO t VALUES (1, 'Alice', 9.5, x'0102'), (2, NULL, NULL, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_reads_every_storage_class() {
        let conn = seeded();
        let mut stmt = conn.prepare("SELECT id, name, score, data FROM t ORDER BY id").unwrap();
        let mut rows = stmt.query().unwrap();
        assert_eq!(rows.column_names(), ["id", "name", "score", "data"]);

        let row = rows.next_row().unwrap().unwrap();
        assert_eq!(
            row.values().unwrap(),
            vec![
                SqlValue::Integer(1),
                SqlValue::Text("Alice".into()),
                SqlValue::Real(9.5),
                SqlValue::Blob(vec![1, 2]),
            ]
        );
        assert_eq!(row.get::<String>(1).unwrap(), "Alice");

        let row = rows.next_row().unwrap().unwrap();
        assert!(row.is_null(1).unwrap());
        assert_eq!(row.get::<Option<f64>>(2).unwrap(), None);
        assert!(row.value(4).is_err());
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let conn = seeded();
        let mut stmt = conn.prepare("SELECT id FROM t").unwrap();
        let mut rows = stmt.query().unwrap();
        while rows.next_row().unwrap().is_some() {}
        for _ in 0..3 {
            assert!(rows.next_row().unwrap().is_none());
        }
        assert!(rows.is_exhausted());
    }

    #[test]
    fn test_empty_result_is_exhausted_immediately() {
        let conn = seeded();
        let rows = conn
            .prepare("SELECT id FROM t WHERE id > 100")
            .unwrap()
            .into_rows()
            .unwrap();
        assert!(rows.is_exhausted());
        assert_eq!(rows.column_count(), 1);
    }

    #[test]
    fn test_dropping_borrowed_rows_resets_statement() {
        let conn = seeded();
        let mut stmt = conn.prepare("SELECT id FROM t WHERE id >= ?").unwrap();
        stmt.bind(&[SqlValue::Integer(1)]).unwrap();
        {
            let mut rows = stmt.query().unwrap();
            assert!(rows.next_row().unwrap().is_some());
        }
        assert_eq!(stmt.state(), crate::native::StatementState::Prepared);
        // Bindings were cleared by the reset, so the parameter is NULL and nothing matches.
        let mut rows = stmt.query().unwrap();
        assert!(rows.next_row().unwrap().is_none());
    }

    #[test]
    fn test_returning_reports_rows_affected_after_exhaustion() {
        let conn = seeded();
        let mut rows = conn
            .prepare("DELETE FROM t RETURNING id")
            .unwrap()
            .into_rows()
            .unwrap();
        let mut seen = 0;
        while rows.next_row().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 2);
        assert_eq!(rows.rows_affected(), Some(2));
    }
}
