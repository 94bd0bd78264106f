//! Native database connections.

use std::ffi::{CString, c_char, c_int};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::ffi;
use tracing::{debug, instrument};

use super::error;
use super::handle::{ConnectionKind, ErrorMessageKind, NativeHandle};
use super::statement::NativeStatement;
use crate::{Error, Result};

/// Default time the engine waits on a locked database before returning `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What a native open call should attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeTarget {
    /// The `:memory:` sentinel.
    Memory,
    /// A filesystem path.
    File(PathBuf),
    /// A `file:` URI, opened with URI parsing enabled.
    FileUri(String),
    /// A local replica kept in sync with a remote database.
    RemoteReplica {
        /// Local replica file.
        replica_path: PathBuf,
        /// Remote primary URL.
        url: String,
    },
    /// A remote database reached through the engine.
    Remote(String),
}

impl NativeTarget {
    /// Classifies a target string by sentinel and URL scheme.
    #[must_use]
    pub fn classify(target: &str) -> Self {
        let trimmed = target.trim();
        if trimmed.eq_ignore_ascii_case(":memory:") {
            Self::Memory
        } else if trimmed.starts_with("file:") {
            Self::FileUri(trimmed.to_string())
        } else if is_remote_url(trimmed) {
            Self::Remote(trimmed.to_string())
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }

    /// Returns true for the shared in-memory sentinel.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl fmt::Display for NativeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::FileUri(uri) | Self::Remote(uri) => f.write_str(uri),
            Self::RemoteReplica { replica_path, url } => {
                write!(f, "{} (replica of {url})", replica_path.display())
            },
        }
    }
}

/// Returns true when `target` starts with a scheme the HTTP transport serves.
pub(crate) fn is_remote_url(target: &str) -> bool {
    const SCHEMES: &[&str] = &["libsql://", "http://", "https://", "ws://", "wss://"];
    let lower = target.to_ascii_lowercase();
    SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Options applied when opening a native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Busy timeout handed to `sqlite3_busy_timeout`.
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// An open `sqlite3*` connection.
///
/// Opened in serialized threading mode, so a single connection may be shared across
/// threads (the registry relies on this for `:memory:`). Callers still have to serialize
/// command sequences themselves if they need ordering across threads.
pub struct NativeConnection {
    handle: NativeHandle<ConnectionKind>,
    target: NativeTarget,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX, so the engine serializes every
// call made on it, and the guard only frees it once through `&mut self` or drop.
unsafe impl Send for NativeConnection {}
// SAFETY: see above; all `&self` methods are single engine calls on a serialized handle.
unsafe impl Sync for NativeConnection {}

impl NativeConnection {
    /// Opens a connection to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the target cannot be expressed to the engine
    /// (remote targets, paths with interior NUL bytes) or the engine refuses to open it.
    #[instrument(skip(options), fields(target = %target))]
    pub fn open(target: &NativeTarget, options: &OpenOptions) -> Result<Self> {
        let mut flags =
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_FULLMUTEX;
        let filename = match target {
            NativeTarget::Memory => ":memory:".to_string(),
            NativeTarget::File(path) => path_to_str(path)?.to_string(),
            NativeTarget::FileUri(uri) => {
                flags |= ffi::SQLITE_OPEN_URI;
                uri.clone()
            },
            NativeTarget::RemoteReplica { url, .. } | NativeTarget::Remote(url) => {
                return Err(Error::Connection(format!(
                    "the embedded engine cannot reach remote database '{url}'; \
                     use an authToken connection string for the HTTP transport"
                )));
            },
        };
        let c_filename = CString::new(filename)
            .map_err(|_| Error::Connection("database path contains a NUL byte".to_string()))?;

        let mut raw: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: `c_filename` outlives the call and `raw` is a valid out-pointer.
        let rc = unsafe { ffi::sqlite3_open_v2(c_filename.as_ptr(), &raw mut raw, flags, ptr::null()) };
        // The engine may allocate a handle even when the open fails; take ownership first.
        // SAFETY: `raw` is either null or a handle nothing else owns.
        let mut handle = unsafe { NativeHandle::<ConnectionKind>::from_raw(raw) };
        if rc != ffi::SQLITE_OK {
            let err = error::from_connection(handle.as_ptr(), rc, "open");
            handle.release();
            return Err(match err {
                Error::Transport { cause, .. } => {
                    Error::Connection(format!("failed to open '{target}': {cause}"))
                },
                other => other,
            });
        }

        let busy_ms = c_int::try_from(options.busy_timeout.as_millis()).unwrap_or(c_int::MAX);
        // SAFETY: `handle` is live.
        unsafe {
            ffi::sqlite3_busy_timeout(handle.as_ptr(), busy_ms);
            ffi::sqlite3_extended_result_codes(handle.as_ptr(), 1);
        }

        debug!(target = %target, busy_ms, "Opened native connection");
        Ok(Self {
            handle,
            target: target.clone(),
        })
    }

    /// Convenience for [`NativeConnection::open`] with default options.
    ///
    /// # Errors
    ///
    /// See [`NativeConnection::open`].
    pub fn open_default(target: &NativeTarget) -> Result<Self> {
        Self::open(target, &OpenOptions::default())
    }

    /// The target this connection was opened for.
    #[must_use]
    pub const fn target(&self) -> &NativeTarget {
        &self.target
    }

    pub(crate) const fn as_ptr(&self) -> *mut ffi::sqlite3 {
        self.handle.as_ptr()
    }

    /// Address of the underlying handle, for identity checks in diagnostics and tests.
    #[must_use]
    pub fn handle_address(&self) -> usize {
        self.handle.as_ptr() as usize
    }

    /// Prepares a statement on this connection.
    ///
    /// # Errors
    ///
    /// See [`NativeStatement::prepare`].
    pub fn prepare(self: &Arc<Self>, sql: &str) -> Result<NativeStatement> {
        NativeStatement::prepare(self, sql)
    }

    /// Runs one or more SQL statements with no parameters and no result rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] with the engine's message when any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::binding("sql", "SQL text contains a NUL byte"))?;
        let mut message: *mut c_char = ptr::null_mut();
        // SAFETY: the connection is live, `c_sql` outlives the call, no callback is used,
        // and `message` is a valid out-pointer.
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.as_ptr(),
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &raw mut message,
            )
        };
        // SAFETY: whatever the engine wrote to `message` is ours to free.
        let mut buffer = unsafe { NativeHandle::<ErrorMessageKind>::from_raw(message) };
        if rc == ffi::SQLITE_OK {
            buffer.release();
            return Ok(());
        }
        Err(error::from_owned_message(buffer, rc, "exec"))
    }

    /// Rows changed by the most recent INSERT, UPDATE, or DELETE on this connection.
    #[must_use]
    pub fn changes(&self) -> u64 {
        // SAFETY: the connection is live.
        let changes = unsafe { ffi::sqlite3_changes64(self.as_ptr()) };
        u64::try_from(changes).unwrap_or(0)
    }

    /// Rows changed on this connection since it was opened.
    #[must_use]
    pub fn total_changes(&self) -> u64 {
        // SAFETY: the connection is live.
        let total = unsafe { ffi::sqlite3_total_changes64(self.as_ptr()) };
        u64::try_from(total).unwrap_or(0)
    }

    /// Rowid of the most recent successful INSERT on this connection.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: the connection is live.
        unsafe { ffi::sqlite3_last_insert_rowid(self.as_ptr()) }
    }

    /// Returns false while an explicit transaction is open.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        // SAFETY: the connection is live.
        unsafe { ffi::sqlite3_get_autocommit(self.as_ptr()) != 0 }
    }

    /// Version of the linked engine.
    #[must_use]
    pub fn engine_version() -> String {
        // SAFETY: sqlite3_libversion returns static text.
        unsafe { error::copy_text(ffi::sqlite3_libversion()) }.unwrap_or_default()
    }

    /// Closes the connection. Statements still alive keep the engine object open until
    /// they are finalized.
    pub fn close(mut self) {
        debug!(target = %self.target, "Closing native connection");
        self.handle.release();
    }
}

impl fmt::Debug for NativeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeConnection")
            .field("target", &self.target)
            .field("handle", &self.handle)
            .finish()
    }
}

fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::Connection(format!("database path '{}' is not valid UTF-8", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(":memory:" => NativeTarget::Memory; "memory sentinel")]
    #[test_case(":MEMORY:" => NativeTarget::Memory; "memory sentinel any case")]
    #[test_case("data/app.db" => NativeTarget::File(PathBuf::from("data/app.db")); "relative path")]
    #[test_case("file:app.db?mode=ro" => NativeTarget::FileUri("file:app.db?mode=ro".into()); "file uri")]
    #[test_case("libsql://db.example.io" => NativeTarget::Remote("libsql://db.example.io".into()); "libsql url")]
    #[test_case("wss://db.example.io" => NativeTarget::Remote("wss://db.example.io".into()); "websocket url")]
    fn test_classify(target: &str) -> NativeTarget {
        NativeTarget::classify(target)
    }

    #[test]
    fn test_open_memory_and_execute_batch() {
        let conn = NativeConnection::open_default(&NativeTarget::Memory).unwrap();
        conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        assert_eq!(conn.changes(), 2);
        assert_eq!(conn.last_insert_rowid(), 2);
        assert!(conn.is_autocommit());
        conn.close();
    }

    #[test]
    fn test_execute_batch_error_carries_engine_message() {
        let conn = NativeConnection::open_default(&NativeTarget::Memory).unwrap();
        let err = conn.execute_batch("SELEC 1").unwrap_err();
        assert_eq!(err.native_code(), Some(ffi::SQLITE_ERROR));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_remote_targets_are_rejected_at_open() {
        let remote = NativeTarget::Remote("libsql://db.example.io".into());
        assert!(matches!(
            NativeConnection::open_default(&remote),
            Err(Error::Connection(_))
        ));
        let replica = NativeTarget::RemoteReplica {
            replica_path: PathBuf::from("replica.db"),
            url: "libsql://db.example.io".into(),
        };
        assert!(matches!(
            NativeConnection::open_default(&replica),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_open_missing_directory_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("db.sqlite");
        let err = NativeConnection::open_default(&NativeTarget::File(path)).unwrap_err();
        assert!(matches!(err, Error::Connection(ref msg) if msg.contains("failed to open")));
    }

    #[test]
    fn test_engine_version_is_reported() {
        assert!(NativeConnection::engine_version().starts_with('3'));
    }
}
