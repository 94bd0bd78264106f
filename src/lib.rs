//! # sqlbridge
//!
//! libSQL/SQLite connectivity for relational-mapping layers.
//!
//! One uniform connection/command/cursor surface is served by two transports:
//!
//! - **Native**: the embedded SQLite engine, driven through its raw C ABI with every
//!   native handle owned by a release-once guard.
//! - **HTTP pipeline**: JSON requests to a hosted libSQL endpoint (`/v2/pipeline`),
//!   authenticated with a bearer token.
//!
//! In-memory native databases are shared process-wide through a
//! [`SharedConnectionRegistry`], so every logical connection to `:memory:` sees the
//! same database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlbridge::DriverConnection;
//!
//! let mut conn = DriverConnection::new(":memory:")?;
//! conn.open()?;
//!
//! let mut cmd = conn.create_command("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)");
//! cmd.execute()?;
//!
//! cmd.set_sql("INSERT INTO t(name) VALUES (@name)");
//! cmd.add_named_parameter("@name", "Alice");
//! assert_eq!(cmd.execute()?, 1);
//!
//! let mut query = conn.create_command("SELECT id, name FROM t ORDER BY id");
//! let mut cursor = query.execute_reader()?;
//! while let Some(row) = cursor.next_row()? {
//!     let name: String = row.get(1)?;
//! }
//! # Ok::<(), sqlbridge::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// The native transport is the only place allowed to touch the C ABI.
#![deny(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod driver;
pub mod http;
#[allow(unsafe_code)]
pub mod native;
pub mod observability;
pub mod registry;
pub mod value;

// Re-exports for convenience
pub use config::DriverConfig;
pub use driver::{
    AsyncDriver, ConnectionDescriptor, ConnectionState, DriverCommand, DriverConnection,
    ExecuteOutcome, IsolationLevel, Parameter, ParameterList, ResultCursor, RowRef, Transaction,
    TransportMode,
};
pub use http::{HttpTransport, RowTable};
pub use registry::SharedConnectionRegistry;
pub use value::{FromSqlValue, HostType, HostValue, SqlType, SqlValue};

/// Error type for sqlbridge operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Connection` | Malformed connection string, missing auth token, native open failure |
/// | `Binding` | Unsupported parameter value, parameter count/ordinal mismatch |
/// | `Transport` | Non-zero native return code, non-2xx HTTP status, malformed response |
/// | `State` | Operation attempted in the wrong connection or command state |
/// | `Conversion` | A column value cannot be decoded into the requested host type |
/// | `Unsupported` | The active transport or engine cannot express the operation |
/// | `OperationFailed` | Config file I/O or parse errors, logging initialization |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The connection could not be described or established.
    ///
    /// Raised when:
    /// - The connection string is empty or has no usable target
    /// - An HTTP-classified connection string carries no `authToken`
    /// - The native engine refuses to open the target
    #[error("connection error: {0}")]
    Connection(String),

    /// A parameter could not be bound.
    #[error("binding error for parameter {parameter}: {cause}")]
    Binding {
        /// `@name` or `#ordinal` of the offending parameter.
        parameter: String,
        /// The underlying cause.
        cause: String,
    },

    /// A transport call failed.
    ///
    /// Raised when:
    /// - A native call returns a non-OK code (`native_code` is set)
    /// - The pipeline endpoint answers with a non-2xx status (`http_status` and `body` are set)
    /// - The network request fails or the response cannot be decoded
    #[error("transport failure in '{operation}': {cause}")]
    Transport {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
        /// Native result code, for native failures.
        native_code: Option<i32>,
        /// HTTP status, for HTTP failures.
        http_status: Option<u16>,
        /// Raw response body, for HTTP failures.
        body: Option<String>,
    },

    /// An operation was attempted in the wrong state.
    #[error("invalid state: {0}")]
    State(String),

    /// A value could not be converted to the requested host type.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// The operation is not offered by the active transport.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An ambient operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a transport error for a failed native call.
    #[must_use]
    pub fn native(operation: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            cause: message.into(),
            native_code: Some(code),
            http_status: None,
            body: None,
        }
    }

    /// Builds a transport error for a non-success HTTP exchange.
    #[must_use]
    pub fn http(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::Transport {
            operation: operation.into(),
            cause: format!("endpoint returned status {status}: {body}"),
            native_code: None,
            http_status: Some(status),
            body: Some(body),
        }
    }

    /// Builds a transport error with no native code or HTTP status.
    #[must_use]
    pub fn transport(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            cause: cause.into(),
            native_code: None,
            http_status: None,
            body: None,
        }
    }

    /// Builds a binding error for the given parameter label.
    #[must_use]
    pub fn binding(parameter: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Binding {
            parameter: parameter.into(),
            cause: cause.into(),
        }
    }

    /// Returns the native result code for native transport failures.
    #[must_use]
    pub const fn native_code(&self) -> Option<i32> {
        match self {
            Self::Transport { native_code, .. } => *native_code,
            _ => None,
        }
    }

    /// Returns the HTTP status for HTTP transport failures.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport { http_status, .. } => *http_status,
            _ => None,
        }
    }
}

/// Result type alias for sqlbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
