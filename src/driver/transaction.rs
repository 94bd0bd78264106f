//! Transactions.
//!
//! Native connections issue `BEGIN`/`COMMIT`/`ROLLBACK`. The HTTP pipeline endpoint is
//! stateless per request, so an HTTP transaction is a no-op object: commit and rollback
//! succeed without sending anything, and each statement stays individually atomic.

use std::fmt;

use tracing::{debug, warn};

use super::connection::{Backend, DriverConnection};
use crate::{Error, Result};

/// Requested isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Engine default.
    #[default]
    Unspecified,
    /// Dirty reads allowed.
    ReadUncommitted,
    /// No dirty reads.
    ReadCommitted,
    /// Repeatable reads.
    RepeatableRead,
    /// Fully serialized.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
    /// Pending changes from more isolated transactions cannot be overwritten.
    Chaos,
}

impl IsolationLevel {
    /// The statement that starts a native transaction at this level.
    ///
    /// The engine serializes writers, so read-committed maps onto a deferred transaction
    /// and serializable onto an immediate one, which takes the write lock up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for levels the engine cannot express.
    pub fn begin_statement(self) -> Result<&'static str> {
        match self {
            Self::Unspecified | Self::ReadCommitted => Ok("BEGIN DEFERRED"),
            Self::Serializable => Ok("BEGIN IMMEDIATE"),
            other => Err(Error::Unsupported(format!(
                "isolation level {other} is not supported by the embedded engine"
            ))),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspecified => "unspecified",
            Self::ReadUncommitted => "read uncommitted",
            Self::ReadCommitted => "read committed",
            Self::RepeatableRead => "repeatable read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
            Self::Chaos => "chaos",
        })
    }
}

/// An open transaction on a [`DriverConnection`].
///
/// Dropping a native transaction that was neither committed nor rolled back rolls it
/// back.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c DriverConnection,
    level: IsolationLevel,
    native: bool,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn begin(conn: &'c DriverConnection, level: IsolationLevel) -> Result<Self> {
        let native = match conn.backend()? {
            Backend::Native { conn: native, .. } => {
                native.execute_batch(level.begin_statement()?)?;
                debug!(%level, "Began native transaction");
                true
            },
            Backend::Http(_) => {
                debug!(%level, "HTTP transport has no transactions; statements run individually");
                false
            },
        };
        Ok(Self {
            conn,
            level,
            native,
            finished: false,
        })
    }

    /// Requested isolation level.
    #[must_use]
    pub const fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    /// Returns true when the transaction is a no-op on the HTTP transport.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.native
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the engine refuses the commit. The transaction
    /// is rolled back in that case.
    pub fn commit(mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the engine refuses the rollback.
    pub fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn finish(&mut self, sql: &str) -> Result<()> {
        self.finished = true;
        if !self.native {
            return Ok(());
        }
        let Backend::Native { conn, .. } = self.conn.backend()? else {
            return Ok(());
        };
        let outcome = conn.execute_batch(sql);
        if outcome.is_err() && !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "Rollback after failed {sql} also failed");
            }
        }
        debug!(statement = sql, "Finished native transaction");
        outcome
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || !self.native {
            return;
        }
        debug!("Rolling back transaction dropped without commit");
        if let Err(err) = self.finish("ROLLBACK") {
            warn!(error = %err, "Implicit rollback failed");
        }
    }
}
