//! Async veneer over the blocking transports.
//!
//! Native calls block in the engine and HTTP calls block in the client, so every
//! operation runs on tokio's blocking pool. Operations on one driver are serialized by
//! its lock, in the order they acquire it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::connection::DriverConnection;
use crate::config::DriverConfig;
use crate::http::RowTable;
use crate::value::{HostValue, SqlValue};
use crate::{Error, Result};

/// A [`DriverConnection`] usable from async code. Clones share the connection.
#[derive(Debug, Clone)]
pub struct AsyncDriver {
    inner: Arc<Mutex<DriverConnection>>,
}

impl AsyncDriver {
    /// Parses `connection_string` and opens the connection on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the parse or open error.
    pub async fn open(connection_string: &str, config: DriverConfig) -> Result<Self> {
        let connection_string = connection_string.to_string();
        let conn = run_blocking("open", move || {
            let mut conn = DriverConnection::with_config(&connection_string, config)?;
            conn.open()?;
            Ok(conn)
        })
        .await?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection, open or not.
    #[must_use]
    pub fn from_connection(conn: DriverConnection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DriverConnection) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        run_blocking(operation, move || {
            let mut conn = inner.blocking_lock();
            f(&mut conn)
        })
        .await
    }

    /// Executes a statement and returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute`](super::DriverCommand::execute).
    pub async fn execute(&self, sql: &str, parameters: Vec<HostValue>) -> Result<u64> {
        let sql = sql.to_string();
        self.with_connection("execute", move |conn| {
            let mut cmd = conn.create_command(sql);
            for value in parameters {
                cmd.add_parameter(value);
            }
            cmd.execute()
        })
        .await
    }

    /// Runs a query and buffers every row.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute_reader`](super::DriverCommand::execute_reader).
    pub async fn query(&self, sql: &str, parameters: Vec<HostValue>) -> Result<RowTable> {
        let sql = sql.to_string();
        self.with_connection("query", move |conn| {
            let mut cmd = conn.create_command(sql);
            for value in parameters {
                cmd.add_parameter(value);
            }
            let table = cmd.execute_reader()?.collect_rows()?;
            Ok(table)
        })
        .await
    }

    /// Runs a query and returns the first column of the first row.
    ///
    /// # Errors
    ///
    /// See [`DriverCommand::execute_scalar`](super::DriverCommand::execute_scalar).
    pub async fn execute_scalar(
        &self,
        sql: &str,
        parameters: Vec<HostValue>,
    ) -> Result<Option<SqlValue>> {
        let sql = sql.to_string();
        self.with_connection("execute_scalar", move |conn| {
            let mut cmd = conn.create_command(sql);
            for value in parameters {
                cmd.add_parameter(value);
            }
            cmd.execute_scalar()
        })
        .await
    }

    /// Returns true when the database has at least one user table.
    ///
    /// # Errors
    ///
    /// See [`DriverConnection::has_tables`].
    pub async fn has_tables(&self) -> Result<bool> {
        self.with_connection("has_tables", |conn| conn.has_tables())
            .await
    }

    /// Closes the connection on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when the blocking task panics.
    pub async fn close(&self) -> Result<()> {
        self.with_connection("close", |conn| {
            conn.close();
            Ok(())
        })
        .await
    }
}

async fn run_blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    debug!(operation, "Offloading to blocking pool");
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SharedConnectionRegistry;

    fn isolated_memory() -> AsyncDriver {
        let mut conn = DriverConnection::new(":memory:")
            .unwrap()
            .with_registry(Arc::new(SharedConnectionRegistry::new()));
        conn.open().unwrap();
        AsyncDriver::from_connection(conn)
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let driver = isolated_memory();
        driver
            .execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)", vec![])
            .await
            .unwrap();
        let affected = driver
            .execute("INSERT INTO t(name) VALUES (?)", vec![HostValue::from("Alice")])
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let table = driver.query("SELECT id, name FROM t", vec![]).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get::<String>(0, 1).unwrap(), "Alice");
        assert!(driver.has_tables().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_driver_reports_state_error() {
        let driver = isolated_memory();
        driver.close().await.unwrap();
        let err = driver.execute_scalar("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }
}
