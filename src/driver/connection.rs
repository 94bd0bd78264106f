//! The uniform connection.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument};

use super::command::DriverCommand;
use super::descriptor::{ConnectionDescriptor, TransportMode};
use super::transaction::{IsolationLevel, Transaction};
use crate::config::DriverConfig;
use crate::http::HttpTransport;
use crate::native::{NativeConnection, NativeTarget};
use crate::registry::SharedConnectionRegistry;
use crate::value::SqlValue;
use crate::{Error, Result};

/// Registry key for the shared in-memory database.
const MEMORY_KEY: &str = ":memory:";

const HAS_TABLES_SQL: &str =
    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Closed,
    /// Connected and ready for commands.
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
        })
    }
}

/// The transport behind an open connection.
#[derive(Debug)]
pub(crate) enum Backend {
    /// Embedded engine. `shared` handles belong to the registry.
    Native {
        conn: Arc<NativeConnection>,
        shared: bool,
    },
    /// Pipeline endpoint.
    Http(Arc<HttpTransport>),
}

impl Backend {
    pub(crate) const fn mode(&self) -> TransportMode {
        match self {
            Self::Native { .. } => TransportMode::Native,
            Self::Http(_) => TransportMode::Http,
        }
    }
}

/// A logical connection over either transport.
///
/// The connection string is parsed at construction, so a malformed string or a missing
/// auth token fails before anything touches the network or the filesystem.
///
/// Commands and transactions borrow the connection, so it cannot be closed while any
/// of them is alive. Concurrent use of one open connection from several threads is not
/// synchronized here; share a `Mutex<DriverConnection>` or open one connection per
/// thread.
#[derive(Debug)]
pub struct DriverConnection {
    descriptor: ConnectionDescriptor,
    config: DriverConfig,
    registry: Arc<SharedConnectionRegistry>,
    backend: Option<Backend>,
}

impl DriverConnection {
    /// Creates a closed connection with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the connection string cannot be parsed.
    pub fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, DriverConfig::default())
    }

    /// Creates a closed connection with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the connection string cannot be parsed.
    pub fn with_config(connection_string: &str, config: DriverConfig) -> Result<Self> {
        Ok(Self {
            descriptor: ConnectionDescriptor::parse(connection_string)?,
            config,
            registry: SharedConnectionRegistry::global(),
            backend: None,
        })
    }

    /// Uses `registry` instead of the process-wide one for shared in-memory handles.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SharedConnectionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Opens the transport selected by the connection string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when already open, and [`Error::Connection`] when the
    /// native engine cannot open the target or the HTTP client cannot be built.
    #[instrument(skip(self), fields(mode = %self.descriptor.mode(), database = %self.database_name()))]
    pub fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Err(Error::State("connection is already open".to_string()));
        }
        let backend = match self.descriptor.mode() {
            TransportMode::Native => self.open_native()?,
            TransportMode::Http => {
                let token = self.descriptor.auth_token().ok_or_else(|| {
                    Error::Connection("HTTP connection has no auth token".to_string())
                })?;
                let transport = HttpTransport::with_config(
                    self.descriptor.target(),
                    SecretString::from(token.expose_secret().to_string()),
                    self.config.http,
                )?;
                Backend::Http(Arc::new(transport))
            },
        };
        info!(mode = %backend.mode(), "Connection opened");
        self.backend = Some(backend);
        Ok(())
    }

    fn open_native(&self) -> Result<Backend> {
        let target = self.descriptor.native_target();
        let options = self.config.open_options();
        if self.descriptor.is_shared_memory() {
            let conn = self
                .registry
                .get_or_create(MEMORY_KEY, || NativeConnection::open(&target, &options))?;
            return Ok(Backend::Native { conn, shared: true });
        }
        let conn = NativeConnection::open(&target, &options)?;
        Ok(Backend::Native {
            conn: Arc::new(conn),
            shared: false,
        })
    }

    /// Closes the connection. Closing a closed connection does nothing.
    ///
    /// An exclusively owned native handle is released; a shared in-memory handle stays
    /// registered for the other logical connections.
    pub fn close(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        match backend {
            Backend::Native { conn, shared: true } => {
                drop(conn);
                debug!("Detached from shared in-memory connection");
            },
            Backend::Native {
                conn,
                shared: false,
            } => match Arc::try_unwrap(conn) {
                Ok(conn) => conn.close(),
                Err(still_shared) => {
                    debug!(
                        references = Arc::strong_count(&still_shared),
                        "Native handle still referenced; release deferred to last owner"
                    );
                },
            },
            Backend::Http(_) => {},
        }
        debug!("Connection closed");
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        if self.backend.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Transport selected by the connection string.
    #[must_use]
    pub const fn mode(&self) -> TransportMode {
        self.descriptor.mode()
    }

    /// Parsed connection string.
    #[must_use]
    pub const fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Driver configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> Result<&Backend> {
        self.backend
            .as_ref()
            .ok_or_else(|| Error::State("connection is not open".to_string()))
    }

    /// Creates a command for `sql`. The connection does not need to be open yet.
    #[must_use]
    pub fn create_command(&self, sql: impl Into<String>) -> DriverCommand<'_> {
        DriverCommand::new(self, sql.into())
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when closed, [`Error::Unsupported`] for isolation levels
    /// the engine cannot express, and [`Error::Transport`] when `BEGIN` fails.
    pub fn begin_transaction(&self, level: IsolationLevel) -> Result<Transaction<'_>> {
        Transaction::begin(self, level)
    }

    /// Database name: the file name, `:memory:`, or the endpoint host.
    #[must_use]
    pub fn database_name(&self) -> String {
        self.descriptor.database_name()
    }

    /// The target as given in the connection string.
    #[must_use]
    pub fn data_source(&self) -> &str {
        self.descriptor.target()
    }

    /// Engine version for native connections, a fixed label for HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when closed, or the query error.
    pub fn server_version(&self) -> Result<String> {
        match self.backend()? {
            Backend::Native { .. } => {
                let version = self
                    .create_command("SELECT sqlite_version()")
                    .execute_scalar()?;
                match version {
                    Some(SqlValue::Text(v)) => Ok(v),
                    other => Err(Error::Conversion(format!(
                        "unexpected engine version value: {other:?}"
                    ))),
                }
            },
            Backend::Http(_) => Ok("libSQL HTTP".to_string()),
        }
    }

    /// Returns true when the database has at least one user table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] when closed, or the query error.
    pub fn has_tables(&self) -> Result<bool> {
        let count = self.create_command(HAS_TABLES_SQL).execute_scalar()?;
        Ok(count.and_then(|v| v.as_i64()).unwrap_or(0) > 0)
    }

    /// Returns true when the database exists: always for in-memory and HTTP targets,
    /// and for files when the file is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        if self.descriptor.mode() == TransportMode::Http {
            return true;
        }
        match self.descriptor.native_target() {
            NativeTarget::Memory | NativeTarget::Remote(_) => true,
            NativeTarget::File(path) | NativeTarget::RemoteReplica { replica_path: path, .. } => {
                path.exists()
            },
            NativeTarget::FileUri(uri) => {
                let path = uri.trim_start_matches("file:");
                let path = path.split(['?', '#']).next().unwrap_or(path);
                path == ":memory:" || Path::new(path).exists()
            },
        }
    }

    /// Address of the native handle, for identity checks.
    #[must_use]
    pub fn native_handle_address(&self) -> Option<usize> {
        match self.backend.as_ref()? {
            Backend::Native { conn, .. } => Some(conn.handle_address()),
            Backend::Http(_) => None,
        }
    }
}

impl Drop for DriverConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated(conn_str: &str) -> DriverConnection {
        DriverConnection::new(conn_str)
            .unwrap()
            .with_registry(Arc::new(SharedConnectionRegistry::new()))
    }

    #[test]
    fn test_open_close_lifecycle() {
        let mut conn = isolated(":memory:");
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.open().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(matches!(conn.open(), Err(Error::State(_))));
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_operations_require_open() {
        let conn = isolated(":memory:");
        assert!(matches!(
            conn.create_command("SELECT 1").execute(),
            Err(Error::State(_))
        ));
        assert!(matches!(
            conn.begin_transaction(IsolationLevel::Unspecified),
            Err(Error::State(_))
        ));
        assert!(conn.native_handle_address().is_none());
    }

    #[test]
    fn test_shared_memory_survives_one_close() {
        let registry = Arc::new(SharedConnectionRegistry::new());
        let mut a = DriverConnection::new(":memory:")
            .unwrap()
            .with_registry(Arc::clone(&registry));
        let mut b = DriverConnection::new(":memory:")
            .unwrap()
            .with_registry(Arc::clone(&registry));
        a.open().unwrap();
        b.open().unwrap();
        assert_eq!(a.native_handle_address(), b.native_handle_address());

        a.create_command("CREATE TABLE shared(x)").execute().unwrap();
        a.close();
        assert!(b.has_tables().unwrap());
    }

    #[test]
    fn test_metadata() {
        let mut conn = isolated(":memory:");
        conn.open().unwrap();
        assert_eq!(conn.database_name(), ":memory:");
        assert_eq!(conn.data_source(), ":memory:");
        assert!(conn.exists());
        assert!(!conn.has_tables().unwrap());
        assert_eq!(
            conn.server_version().unwrap(),
            NativeConnection::engine_version()
        );
    }

    #[test]
    fn test_file_exists_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.db");
        let mut conn = DriverConnection::new(path.to_string_lossy().as_ref()).unwrap();
        assert!(!conn.exists());
        conn.open().unwrap();
        conn.create_command("CREATE TABLE t(x)").execute().unwrap();
        assert!(conn.exists());
        assert!(conn.has_tables().unwrap());
    }

    #[test]
    fn test_http_string_without_token_fails_at_construction() {
        assert!(matches!(
            DriverConnection::new("libsql://db.example.io"),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_http_open_sends_nothing() {
        let mut conn = DriverConnection::new("libsql://127.0.0.1:9?authToken=t").unwrap();
        conn.open().unwrap();
        assert_eq!(conn.mode(), TransportMode::Http);
        assert_eq!(conn.server_version().unwrap(), "libSQL HTTP");
        assert!(conn.exists());
    }
}
