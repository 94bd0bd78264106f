//! Native transport over the embedded engine's C ABI.
//!
//! All `unsafe` in the crate lives under this module. Handles are owned by
//! [`NativeHandle`] guards, and non-OK result codes are converted to [`crate::Error`] in
//! one place.
//!
//! Ownership chain:
//!
//! ```text
//! NativeConnection ──Arc──▶ NativeStatement ──(owned | &mut)──▶ NativeRows ──&──▶ NativeRow
//! ```
//!
//! A statement can only be reset or finalized once its row set has been dropped or
//! exhausted, since the row set holds it exclusively.

mod connection;
mod error;
mod handle;
mod rows;
mod statement;

pub use connection::{DEFAULT_BUSY_TIMEOUT, NativeConnection, NativeTarget, OpenOptions};
pub(crate) use connection::is_remote_url;
pub use handle::{ConnectionKind, ErrorMessageKind, HandleKind, NativeHandle, StatementKind};
pub use rows::{NativeRow, NativeRows};
pub use statement::{ExecuteOutcome, NativeStatement, StatementState};
