//! Translation of native result codes into [`Error`].
//!
//! This is the only place a non-OK code becomes an error value.

use std::ffi::{CStr, c_char, c_int};

use rusqlite::ffi;

use super::handle::{ErrorMessageKind, NativeHandle};
use crate::Error;

/// Copies a borrowed, NUL-terminated native string.
///
/// # Safety
///
/// `text` must be null or point to a NUL-terminated string that stays valid for the call.
pub(crate) unsafe fn copy_text(text: *const c_char) -> Option<String> {
    if text.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
}

/// Generic text for a result code, independent of any connection.
pub(crate) fn code_message(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to static text.
    unsafe { copy_text(ffi::sqlite3_errstr(rc)) }.unwrap_or_else(|| format!("result code {rc}"))
}

/// Builds the error for a failed call on `db`, reading the connection's last message.
///
/// The message buffer behind `sqlite3_errmsg` belongs to the connection and is not freed here.
pub(crate) fn from_connection(db: *mut ffi::sqlite3, rc: c_int, operation: &str) -> Error {
    let message = if db.is_null() {
        code_message(rc)
    } else {
        // SAFETY: `db` is a live connection; the returned text is valid until the next call on it.
        unsafe { copy_text(ffi::sqlite3_errmsg(db)) }.unwrap_or_else(|| code_message(rc))
    };
    from_message(operation, rc, message)
}

/// Builds the error for a failed call from an engine-allocated message buffer.
///
/// The buffer is copied and then freed exactly once, whether or not it held any text.
pub(crate) fn from_owned_message(
    mut buffer: NativeHandle<ErrorMessageKind>,
    rc: c_int,
    operation: &str,
) -> Error {
    // SAFETY: a live buffer is NUL-terminated text allocated by the engine.
    let message = unsafe { copy_text(buffer.as_ptr()) };
    buffer.release();
    from_message(operation, rc, message.unwrap_or_else(|| code_message(rc)))
}

fn from_message(operation: &str, rc: c_int, message: String) -> Error {
    metrics::counter!(
        "sqlbridge_native_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
    tracing::debug!(operation, rc, message = %message, "Native call failed");
    Error::native(operation, rc, message)
}

/// Returns `Ok(())` for `SQLITE_OK`, or the connection's error otherwise.
pub(crate) fn check(db: *mut ffi::sqlite3, rc: c_int, operation: &str) -> crate::Result<()> {
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(from_connection(db, rc, operation))
    }
}
