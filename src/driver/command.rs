//! The uniform command.

use std::time::Duration;

use tracing::{debug, instrument};

use super::connection::{Backend, DriverConnection};
use super::cursor::{BufferedRows, ResultCursor};
use super::parameter::{Parameter, ParameterList};
use crate::native::NativeStatement;
use crate::value::{HostValue, SqlValue};
use crate::{Error, Result};

pub use crate::native::ExecuteOutcome;

/// SQL text plus parameters, executed on whichever transport backs the connection.
///
/// Without [`DriverCommand::prepare`], every execution compiles a fresh statement and
/// finalizes it before returning (or, for readers, when the cursor is released). A
/// prepared command keeps its statement for repeated bind/execute/reset cycles until
/// the SQL changes or the command is dropped.
///
/// Parameters are bound by name when they have one and the statement declares it, and
/// by list position otherwise. The HTTP transport always sends them positionally.
#[derive(Debug)]
pub struct DriverCommand<'c> {
    conn: &'c DriverConnection,
    sql: String,
    parameters: ParameterList,
    timeout: Duration,
    prepared: Option<NativeStatement>,
}

impl<'c> DriverCommand<'c> {
    pub(crate) fn new(conn: &'c DriverConnection, sql: String) -> Self {
        Self {
            conn,
            sql,
            parameters: ParameterList::new(),
            timeout: conn.config().command_timeout,
            prepared: None,
        }
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Replaces the SQL text, finalizing any prepared statement.
    pub fn set_sql(&mut self, sql: impl Into<String>) {
        self.discard_prepared();
        self.sql = sql.into();
    }

    /// Parameters in binding order.
    #[must_use]
    pub const fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    /// Mutable parameters.
    pub fn parameters_mut(&mut self) -> &mut ParameterList {
        &mut self.parameters
    }

    /// Appends a positional parameter.
    pub fn add_parameter(&mut self, value: impl Into<HostValue>) -> &mut Self {
        self.parameters.add(value);
        self
    }

    /// Appends a named parameter.
    pub fn add_named_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<HostValue>,
    ) -> &mut Self {
        self.parameters.push(Parameter::named(name, value));
        self
    }

    /// Removes every parameter.
    pub fn clear_parameters(&mut self) -> &mut Self {
        self.parameters.clear();
        self
    }

    /// Command timeout. Advisory on the native transport, which has no interrupt hook
    /// here; the request timeout on HTTP.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the command timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Compiles the statement once for reuse. Re-preparing replaces the old statement.
    /// Does nothing on HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when the connection is closed, or the compile error.
    pub fn prepare(&mut self) -> Result<()> {
        match self.conn.backend()? {
            Backend::Native { conn, .. } => {
                self.discard_prepared();
                self.prepared = Some(conn.prepare(&self.sql)?);
                Ok(())
            },
            Backend::Http(_) => {
                debug!("HTTP transport has no prepared statements; prepare ignored");
                Ok(())
            },
        }
    }

    /// Returns true when a native statement is held for reuse.
    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn discard_prepared(&mut self) {
        if let Some(stmt) = self.prepared.take() {
            stmt.finalize();
        }
    }

    /// Executes and returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when the connection is closed, [`Error::Binding`] when a
    /// parameter cannot be bound, and [`Error::Transport`] when execution fails.
    pub fn execute(&mut self) -> Result<u64> {
        self.execute_with_outcome().map(|outcome| outcome.rows_affected)
    }

    /// Executes and returns the change count plus the last inserted rowid.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute`].
    #[instrument(skip(self), fields(sql = %self.sql, parameters = self.parameters.len()))]
    pub fn execute_with_outcome(&mut self) -> Result<ExecuteOutcome> {
        let conn = self.conn;
        match conn.backend()? {
            Backend::Native { conn: native, .. } => {
                count_command("native", "execute");
                let outcome = match self.prepared.as_mut() {
                    Some(stmt) => {
                        bind_native(stmt, &self.parameters)?;
                        stmt.execute_with_outcome()?
                    },
                    None => {
                        let mut stmt = native.prepare(&self.sql)?;
                        let outcome = bind_native(&mut stmt, &self.parameters)
                            .and_then(|()| stmt.execute_with_outcome());
                        stmt.finalize();
                        outcome?
                    },
                };
                debug!(rows_affected = outcome.rows_affected, "Native command executed");
                Ok(outcome)
            },
            Backend::Http(transport) => {
                count_command("http", "execute");
                let args = self.parameters.to_wire_values()?;
                let table = transport.execute(&self.sql, &args, Some(self.timeout))?;
                debug!(rows_affected = table.rows_affected(), "HTTP command executed");
                Ok(ExecuteOutcome {
                    rows_affected: table.rows_affected(),
                    last_insert_rowid: table.last_insert_rowid(),
                })
            },
        }
    }

    /// Executes and returns the first column of the first row, or `None` when there
    /// are no rows.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute`].
    pub fn execute_scalar(&mut self) -> Result<Option<SqlValue>> {
        let mut cursor = self.execute_reader()?;
        let value = match cursor.next_row()? {
            Some(row) if row.column_count() > 0 => Some(row.value(0)?),
            _ => None,
        };
        cursor.close();
        Ok(value)
    }

    /// Executes and returns a forward-only cursor over the result rows.
    ///
    /// On the native transport the cursor holds the statement: a prepared one is reset
    /// when the cursor is released, an ephemeral one is finalized.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute`].
    #[instrument(skip(self), fields(sql = %self.sql, parameters = self.parameters.len()))]
    pub fn execute_reader(&mut self) -> Result<ResultCursor<'_>> {
        let conn = self.conn;
        match conn.backend()? {
            Backend::Native { conn: native, .. } => {
                count_command("native", "query");
                match self.prepared.as_mut() {
                    Some(stmt) => {
                        bind_native(stmt, &self.parameters)?;
                        Ok(ResultCursor::Native(stmt.query()?))
                    },
                    None => {
                        let mut stmt = native.prepare(&self.sql)?;
                        if let Err(err) = bind_native(&mut stmt, &self.parameters) {
                            stmt.finalize();
                            return Err(err);
                        }
                        Ok(ResultCursor::Native(stmt.into_rows()?))
                    },
                }
            },
            Backend::Http(transport) => {
                count_command("http", "query");
                let args = self.parameters.to_wire_values()?;
                let table = transport.execute(&self.sql, &args, Some(self.timeout))?;
                debug!(rows = table.len(), "HTTP query buffered");
                Ok(ResultCursor::Buffered(BufferedRows::new(table)))
            },
        }
    }
}

impl Drop for DriverCommand<'_> {
    fn drop(&mut self) {
        self.discard_prepared();
    }
}

fn count_command(transport: &'static str, kind: &'static str) {
    metrics::counter!("sqlbridge_commands_total", "transport" => transport, "kind" => kind)
        .increment(1);
}

/// Binds `parameters` into `stmt`; on any failure every binding is cleared.
fn bind_native(stmt: &mut NativeStatement, parameters: &ParameterList) -> Result<()> {
    let slots = stmt.parameter_count();
    if parameters.len() > slots {
        return Err(Error::binding(
            format!("#{}", slots + 1),
            format!(
                "{} parameter(s) supplied but statement has {slots} slot(s)",
                parameters.len()
            ),
        ));
    }
    for (position, parameter) in parameters.iter().enumerate() {
        if let Err(err) = bind_one(stmt, parameter, position + 1) {
            stmt.clear_bindings();
            return Err(err);
        }
    }
    Ok(())
}

fn bind_one(stmt: &mut NativeStatement, parameter: &Parameter, ordinal: usize) -> Result<()> {
    let value = parameter.to_sql_value(ordinal)?;
    let label = parameter.label(ordinal);
    let index = match parameter.name() {
        Some(name) => stmt.parameter_index(name).ok_or_else(|| {
            Error::binding(&label, "statement declares no parameter with this name")
        })?,
        None => ordinal,
    };
    stmt.bind_at(index, &value).map_err(|err| match err {
        Error::Binding { cause, .. } => Error::binding(label, cause),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SharedConnectionRegistry;
    use std::sync::Arc;

    fn open_memory() -> DriverConnection {
        let mut conn = DriverConnection::new(":memory:")
            .unwrap()
            .with_registry(Arc::new(SharedConnectionRegistry::new()));
        conn.open().unwrap();
        conn.create_command("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)")
            .execute()
            .unwrap();
        conn
    }

    #[test]
    fn test_insert_reports_outcome() {
        let conn = open_memory();
        let mut cmd = conn.create_command("INSERT INTO t(name) VALUES (@name)");
        cmd.add_named_parameter("@name", "Alice");
        let outcome = cmd.execute_with_outcome().unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_rowid, Some(1));
        assert!(!cmd.is_prepared());
    }

    #[test]
    fn test_ddl_and_select_report_zero_rows() {
        let conn = open_memory();
        conn.create_command("INSERT INTO t(name) VALUES ('a')")
            .execute()
            .unwrap();
        assert_eq!(conn.create_command("SELECT * FROM t").execute().unwrap(), 0);

        for ddl in ["CREATE TABLE u(y)", "DROP TABLE u"] {
            let outcome = conn.create_command(ddl).execute_with_outcome().unwrap();
            assert_eq!(outcome.rows_affected, 0, "{ddl}");
            assert_eq!(outcome.last_insert_rowid, None, "{ddl}");
        }
    }

    #[test]
    fn test_named_parameter_without_prefix() {
        let conn = open_memory();
        let mut cmd = conn.create_command("INSERT INTO t(id, name) VALUES (:id, :name)");
        cmd.add_named_parameter("name", "Bob")
            .add_named_parameter("id", 7_i64);
        cmd.execute().unwrap();
        let name = conn
            .create_command("SELECT name FROM t WHERE id = 7")
            .execute_scalar()
            .unwrap();
        assert_eq!(name, Some(SqlValue::Text("Bob".into())));
    }

    #[test]
    fn test_unknown_name_and_extra_parameters_fail() {
        let conn = open_memory();
        let mut cmd = conn.create_command("INSERT INTO t(name) VALUES (@name)");
        cmd.add_named_parameter("@nope", "x");
        let err = cmd.execute().unwrap_err();
        assert!(matches!(err, Error::Binding { ref parameter, .. } if parameter == "@nope"));

        cmd.clear_parameters().add_parameter("a").add_parameter("b");
        let err = cmd.execute().unwrap_err();
        assert!(matches!(err, Error::Binding { ref parameter, .. } if parameter == "#2"));

        let count = conn
            .create_command("SELECT count(*) FROM t")
            .execute_scalar()
            .unwrap();
        assert_eq!(count, Some(SqlValue::Integer(0)));
    }

    #[test]
    fn test_scalar_without_rows_is_none() {
        let conn = open_memory();
        let value = conn
            .create_command("SELECT name FROM t")
            .execute_scalar()
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_prepared_reuse_does_not_leak_bindings() {
        let conn = open_memory();
        let mut insert = conn.create_command("INSERT INTO t(id, name) VALUES (?, ?)");
        insert.prepare().unwrap();
        insert.add_parameter(1_i64).add_parameter("one");
        insert.execute().unwrap();
        insert.clear_parameters().add_parameter(2_i64);
        insert.execute().unwrap();
        assert!(insert.is_prepared());

        let mut query = conn.create_command("SELECT name FROM t WHERE id = ?");
        query.prepare().unwrap();
        query.add_parameter(1_i64);
        assert_eq!(
            query.execute_scalar().unwrap(),
            Some(SqlValue::Text("one".into()))
        );
        query.clear_parameters().add_parameter(2_i64);
        assert_eq!(query.execute_scalar().unwrap(), Some(SqlValue::Null));
    }

    #[test]
    fn test_set_sql_discards_prepared_statement() {
        let conn = open_memory();
        let mut cmd = conn.create_command("SELECT 1");
        cmd.prepare().unwrap();
        assert!(cmd.is_prepared());
        cmd.set_sql("SELECT 2");
        assert!(!cmd.is_prepared());
        assert_eq!(cmd.execute_scalar().unwrap(), Some(SqlValue::Integer(2)));
    }

    #[test]
    fn test_reader_on_prepared_statement_resets_on_close() {
        let conn = open_memory();
        conn.create_command("INSERT INTO t(name) VALUES ('a'), ('b')")
            .execute()
            .unwrap();
        let mut cmd = conn.create_command("SELECT name FROM t ORDER BY id");
        cmd.prepare().unwrap();
        for _ in 0..2 {
            let mut cursor = cmd.execute_reader().unwrap();
            let first = cursor.next_row().unwrap().unwrap().get::<String>(0).unwrap();
            assert_eq!(first, "a");
            cursor.close();
        }
    }

    #[test]
    fn test_syntax_error_surfaces_native_code() {
        let conn = open_memory();
        let err = conn.create_command("SELEC 1").execute().unwrap_err();
        assert!(err.native_code().is_some());
    }
}
