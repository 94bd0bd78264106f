//! Prepared statements on a native connection.

use std::ffi::{CString, c_char, c_int, c_void};
use std::fmt;
use std::ptr;
use std::sync::Arc;

use rusqlite::ffi;
use tracing::{debug, trace};

use super::connection::NativeConnection;
use super::error;
use super::handle::{NativeHandle, StatementKind};
use super::rows::NativeRows;
use crate::value::{NativeBind, SqlValue, to_native_bind};
use crate::{Error, Result};

/// Lifecycle position of a [`NativeStatement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Compiled, nothing bound.
    Prepared,
    /// At least one parameter bound.
    Bound,
    /// Stepped at least once and not yet reset.
    Executed,
}

/// Result of running a statement to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteOutcome {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Rowid of the last inserted row, when the statement inserted one.
    pub last_insert_rowid: Option<i64>,
}

/// Connection counters sampled before a statement runs.
///
/// `sqlite3_changes` and `sqlite3_last_insert_rowid` keep their values across statements
/// that write nothing (DDL included), so a statement's own effect is measured against
/// this mark.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeMark {
    total_changes: u64,
    last_rowid: i64,
}

impl ChangeMark {
    pub(crate) fn take(conn: &NativeConnection) -> Self {
        Self {
            total_changes: conn.total_changes(),
            last_rowid: conn.last_insert_rowid(),
        }
    }

    /// Rows changed since the mark was taken.
    pub(crate) fn rows_affected(self, conn: &NativeConnection) -> u64 {
        if conn.total_changes() == self.total_changes {
            0
        } else {
            conn.changes()
        }
    }

    /// Outcome of `stmt` since the mark was taken.
    fn outcome(self, stmt: &NativeStatement) -> ExecuteOutcome {
        let conn = stmt.connection();
        let rows_affected = self.rows_affected(conn);
        let rowid = conn.last_insert_rowid();
        // A re-inserted rowid equal to the previous one is still this statement's insert.
        let inserted = rows_affected > 0 && (rowid != self.last_rowid || stmt.is_insert());
        ExecuteOutcome {
            rows_affected,
            last_insert_rowid: inserted.then_some(rowid),
        }
    }
}

/// A compiled statement, owning its `sqlite3_stmt*`.
///
/// Holds an `Arc` to its connection, so the connection outlives every statement
/// prepared on it.
pub struct NativeStatement {
    handle: NativeHandle<StatementKind>,
    conn: Arc<NativeConnection>,
    sql: String,
    state: StatementState,
}

// SAFETY: the statement handle is only reached through `&mut self` or `&self` accessors
// that do not step it, and its connection is serialized (see NativeConnection).
unsafe impl Send for NativeStatement {}

impl NativeStatement {
    /// Compiles the first statement in `sql`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] with the engine's message on a compile error, or
    /// [`Error::State`] when `sql` holds no statement at all.
    pub fn prepare(conn: &Arc<NativeConnection>, sql: &str) -> Result<Self> {
        let len = c_int::try_from(sql.len())
            .map_err(|_| Error::binding("sql", "SQL text exceeds the engine's length limit"))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: the connection is live, `sql` is valid for `len` bytes during the call, and
        // `raw` is a valid out-pointer. No tail pointer is requested.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                conn.as_ptr(),
                sql.as_ptr().cast::<c_char>(),
                len,
                &raw mut raw,
                ptr::null_mut(),
            )
        };
        // SAFETY: `raw` is null or a statement nothing else owns.
        let mut handle = unsafe { NativeHandle::<StatementKind>::from_raw(raw) };
        if rc != ffi::SQLITE_OK {
            let err = error::from_connection(conn.as_ptr(), rc, "prepare");
            handle.release();
            return Err(err);
        }
        if !handle.is_live() {
            return Err(Error::State("SQL text contains no statement".to_string()));
        }
        debug!(sql = %sql, "Prepared native statement");
        Ok(Self {
            handle,
            conn: Arc::clone(conn),
            sql: sql.to_string(),
            state: StatementState::Prepared,
        })
    }

    pub(crate) const fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.handle.as_ptr()
    }

    /// The connection this statement was prepared on.
    #[must_use]
    pub const fn connection(&self) -> &Arc<NativeConnection> {
        &self.conn
    }

    /// The SQL text the statement was prepared from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StatementState {
        self.state
    }

    fn transition(&mut self, next: StatementState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "Statement state transition");
            self.state = next;
        }
    }

    /// Number of parameter slots in the SQL.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        // SAFETY: the statement is live.
        let count = unsafe { ffi::sqlite3_bind_parameter_count(self.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    /// 1-based index of a named parameter.
    ///
    /// A bare name is also tried with each of the engine's prefixes (`@`, `:`, `$`).
    #[must_use]
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        let lookup = |candidate: &str| -> Option<usize> {
            let c_name = CString::new(candidate).ok()?;
            // SAFETY: the statement is live and `c_name` outlives the call.
            let index = unsafe { ffi::sqlite3_bind_parameter_index(self.as_ptr(), c_name.as_ptr()) };
            usize::try_from(index).ok().filter(|i| *i > 0)
        };
        if name.starts_with(['@', ':', '$', '?']) {
            return lookup(name);
        }
        ['@', ':', '$']
            .iter()
            .find_map(|prefix| lookup(&format!("{prefix}{name}")))
    }

    /// Binds one value at a 1-based index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] if the statement has been stepped and not reset, and
    /// [`Error::Binding`] when the index is out of range or the engine rejects the value.
    pub fn bind_at(&mut self, index: usize, value: &SqlValue) -> Result<()> {
        if self.state == StatementState::Executed {
            return Err(Error::State(
                "statement must be reset before binding new parameters".to_string(),
            ));
        }
        let label = format!("#{index}");
        let count = self.parameter_count();
        if index == 0 || index > count {
            return Err(Error::binding(
                label,
                format!("index out of range; statement has {count} parameter(s)"),
            ));
        }
        let slot = c_int::try_from(index).map_err(|_| Error::binding(&label, "index overflow"))?;
        let bind = to_native_bind(value);
        let stmt = self.as_ptr();
        // SAFETY: the statement is live and `slot` is within 1..=count. Text and blob
        // payloads are copied by the engine (SQLITE_TRANSIENT) before the call returns.
        let rc = unsafe {
            match bind {
                NativeBind::Null => ffi::sqlite3_bind_null(stmt, slot),
                NativeBind::Int64(n) => ffi::sqlite3_bind_int64(stmt, slot, n),
                NativeBind::Double(f) => ffi::sqlite3_bind_double(stmt, slot, f),
                NativeBind::Text(s) => ffi::sqlite3_bind_text(
                    stmt,
                    slot,
                    s.as_ptr().cast::<c_char>(),
                    payload_len(&label, s.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                NativeBind::Blob(b) => ffi::sqlite3_bind_blob(
                    stmt,
                    slot,
                    b.as_ptr().cast::<c_void>(),
                    payload_len(&label, b.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };
        if rc != ffi::SQLITE_OK {
            let err = error::from_connection(self.conn.as_ptr(), rc, bind.function_name());
            return Err(Error::binding(label, err.to_string()));
        }
        self.transition(StatementState::Bound);
        Ok(())
    }

    /// Binds values positionally in list order, starting at index 1.
    ///
    /// Either every value is bound or none is: a failure clears all bindings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Binding`] when there are more values than parameter slots or a
    /// value is rejected.
    pub fn bind(&mut self, values: &[SqlValue]) -> Result<()> {
        let count = self.parameter_count();
        if values.len() > count {
            return Err(Error::binding(
                format!("#{}", count + 1),
                format!(
                    "{} value(s) supplied but statement has {count} parameter(s)",
                    values.len()
                ),
            ));
        }
        for (offset, value) in values.iter().enumerate() {
            if let Err(err) = self.bind_at(offset + 1, value) {
                self.clear_bindings();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unbinds every parameter, leaving the statement in [`StatementState::Prepared`]
    /// unless it is mid-execution.
    pub fn clear_bindings(&mut self) {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_clear_bindings(self.as_ptr()) };
        if self.state == StatementState::Bound {
            self.transition(StatementState::Prepared);
        }
    }

    /// Rewinds the statement and clears its bindings.
    ///
    /// The return code of `sqlite3_reset` repeats the last step error, which has already
    /// been reported, so it is only traced.
    pub fn reset(&mut self) {
        // SAFETY: the statement is live.
        let rc = unsafe { ffi::sqlite3_reset(self.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            trace!(rc, "sqlite3_reset repeated a prior step error");
        }
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_clear_bindings(self.as_ptr()) };
        self.transition(StatementState::Prepared);
    }

    /// Advances the statement by one step.
    pub(crate) fn step(&mut self) -> Result<bool> {
        self.transition(StatementState::Executed);
        // SAFETY: the statement is live.
        let rc = unsafe { ffi::sqlite3_step(self.as_ptr()) };
        match rc {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            _ => Err(error::from_connection(self.conn.as_ptr(), rc, "step")),
        }
    }

    /// Runs the statement to completion and returns the rows it changed.
    ///
    /// Result rows, if any, are stepped over. The statement is reset afterwards on every
    /// path, ready to be bound again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] with the engine's message when a step fails.
    pub fn execute(&mut self) -> Result<u64> {
        self.execute_with_outcome().map(|outcome| outcome.rows_affected)
    }

    /// Runs the statement to completion and returns the rows it changed plus the rowid
    /// it inserted, if any.
    ///
    /// Statements that change nothing (queries and DDL) report 0 rows and no rowid.
    ///
    /// # Errors
    ///
    /// See [`NativeStatement::execute`].
    pub fn execute_with_outcome(&mut self) -> Result<ExecuteOutcome> {
        let mark = ChangeMark::take(&self.conn);
        let outcome = loop {
            match self.step() {
                Ok(true) => {},
                Ok(false) => break Ok(mark.outcome(self)),
                Err(err) => break Err(err),
            }
        };
        self.reset();
        outcome
    }

    /// Starts a query, lending the statement to the returned row set.
    ///
    /// The statement is reset when the row set is dropped or exhausted, never before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the first step fails.
    pub fn query(&mut self) -> Result<NativeRows<'_>> {
        NativeRows::borrowed(self)
    }

    /// Starts a query, handing ownership of the statement to the returned row set.
    ///
    /// The statement is finalized when the row set is dropped or exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the first step fails.
    pub fn into_rows(self) -> Result<NativeRows<'static>> {
        NativeRows::owned(self)
    }

    /// Returns true when the statement makes no direct changes to the database.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_stmt_readonly(self.as_ptr()) != 0 }
    }

    /// Returns true when the SQL text is an INSERT or REPLACE.
    fn is_insert(&self) -> bool {
        let head = self.sql.trim_start();
        ["insert", "replace"].iter().any(|keyword| {
            head.get(..keyword.len())
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        // SAFETY: the statement is live.
        let count = unsafe { ffi::sqlite3_column_count(self.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Result column names, in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        (0..self.column_count())
            .map(|i| {
                let ordinal = c_int::try_from(i).unwrap_or(c_int::MAX);
                // SAFETY: the statement is live and `ordinal` is below the column count.
                unsafe { error::copy_text(ffi::sqlite3_column_name(self.as_ptr(), ordinal)) }
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Finalizes the statement.
    pub fn finalize(mut self) {
        trace!(sql = %self.sql, "Finalizing native statement");
        self.handle.release();
    }
}

fn payload_len(label: &str, len: usize) -> Result<c_int> {
    c_int::try_from(len)
        .map_err(|_| Error::binding(label, format!("payload of {len} bytes is too large")))
}

impl fmt::Debug for NativeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStatement")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::connection::NativeTarget;

    fn memory() -> Arc<NativeConnection> {
        Arc::new(NativeConnection::open_default(&NativeTarget::Memory).unwrap())
    }

    #[test]
    fn test_prepare_syntax_error_is_transport_error() {
        let conn = memory();
        let err = NativeStatement::prepare(&conn, "SELEC 1").unwrap_err();
        assert_eq!(err.native_code(), Some(ffi::SQLITE_ERROR));
    }

    #[test]
    fn test_prepare_empty_sql_is_state_error() {
        let conn = memory();
        assert!(matches!(
            NativeStatement::prepare(&conn, "  -- nothing"),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_state_transitions() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t(a, b)").unwrap();
        let mut stmt = conn.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
        assert_eq!(stmt.state(), StatementState::Prepared);
        assert_eq!(stmt.parameter_count(), 2);

        stmt.bind(&[SqlValue::Integer(1), SqlValue::Text("x".into())])
            .unwrap();
        assert_eq!(stmt.state(), StatementState::Bound);

        assert_eq!(stmt.execute().unwrap(), 1);
        assert_eq!(stmt.state(), StatementState::Prepared);
        stmt.finalize();
    }

    #[test]
    fn test_too_many_values_is_binding_error() {
        let conn = memory();
        let mut stmt = conn.prepare("SELECT ?").unwrap();
        let err = stmt
            .bind(&[SqlValue::Integer(1), SqlValue::Integer(2)])
            .unwrap_err();
        assert!(matches!(err, Error::Binding { ref parameter, .. } if parameter == "#2"));
        assert_eq!(stmt.state(), StatementState::Prepared);
    }

    #[test]
    fn test_named_parameter_lookup_with_and_without_prefix() {
        let conn = memory();
        let stmt = conn.prepare("SELECT @name, :other").unwrap();
        assert_eq!(stmt.parameter_index("@name"), Some(1));
        assert_eq!(stmt.parameter_index("name"), Some(1));
        assert_eq!(stmt.parameter_index("other"), Some(2));
        assert_eq!(stmt.parameter_index("@missing"), None);
    }

    #[test]
    fn test_execute_resets_after_constraint_failure() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY)").unwrap();
        let mut stmt = conn.prepare("INSERT INTO t VALUES (?)").unwrap();
        stmt.bind(&[SqlValue::Integer(1)]).unwrap();
        stmt.execute().unwrap();
        stmt.bind(&[SqlValue::Integer(1)]).unwrap();
        let err = stmt.execute().unwrap_err();
        assert!(err.native_code().is_some());
        assert_eq!(stmt.state(), StatementState::Prepared);
        stmt.bind(&[SqlValue::Integer(2)]).unwrap();
        assert_eq!(stmt.execute().unwrap(), 1);
    }

    #[test]
    fn test_ddl_after_insert_reports_nothing_changed() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t(x)").unwrap();
        let mut insert = conn.prepare("INSERT INTO t VALUES (1), (2), (3)").unwrap();
        assert_eq!(
            insert.execute_with_outcome().unwrap(),
            ExecuteOutcome {
                rows_affected: 3,
                last_insert_rowid: Some(3),
            }
        );
        insert.finalize();

        for ddl in ["CREATE TABLE u(y)", "ALTER TABLE u ADD COLUMN z", "DROP TABLE u"] {
            let mut stmt = conn.prepare(ddl).unwrap();
            assert_eq!(stmt.execute_with_outcome().unwrap(), ExecuteOutcome::default());
            stmt.finalize();
        }
    }

    #[test]
    fn test_update_reports_rows_but_no_rowid() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2)")
            .unwrap();
        let mut update = conn.prepare("UPDATE t SET x = x + 1").unwrap();
        assert_eq!(
            update.execute_with_outcome().unwrap(),
            ExecuteOutcome {
                rows_affected: 2,
                last_insert_rowid: None,
            }
        );
        update.finalize();
    }

    #[test]
    fn test_reinserted_rowid_is_reported() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY)").unwrap();
        let mut insert = conn.prepare("insert INTO t VALUES (?)").unwrap();
        insert.bind(&[SqlValue::Integer(5)]).unwrap();
        insert.execute().unwrap();
        conn.execute_batch("DELETE FROM t").unwrap();
        insert.bind(&[SqlValue::Integer(5)]).unwrap();
        assert_eq!(
            insert.execute_with_outcome().unwrap().last_insert_rowid,
            Some(5)
        );
        insert.finalize();
    }

    #[test]
    fn test_column_metadata() {
        let conn = memory();
        let stmt = conn.prepare("SELECT 1 AS one, 'a' AS letter").unwrap();
        assert_eq!(stmt.column_names(), vec!["one", "letter"]);
        assert!(stmt.is_readonly());
    }
}
