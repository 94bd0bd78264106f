//! Release-once ownership of native handles.
//!
//! Every native free call in the crate goes through [`NativeHandle::release`], which
//! nulls the pointer after freeing it. Releasing twice is a no-op.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use rusqlite::ffi;
use tracing::{debug, warn};

/// A kind of native handle and its matching free call.
pub trait HandleKind {
    /// Pointee type of the raw handle.
    type Raw;

    /// Short name used in logs and metrics labels.
    const NAME: &'static str;

    /// Frees a live handle, returning the native result code.
    ///
    /// # Safety
    ///
    /// `raw` must be non-null, owned by the caller, and not freed before.
    unsafe fn free(raw: *mut Self::Raw) -> c_int;
}

/// `sqlite3*`: database and connection in one object.
#[derive(Debug)]
pub enum ConnectionKind {}

impl HandleKind for ConnectionKind {
    type Raw = ffi::sqlite3;
    const NAME: &'static str = "connection";

    unsafe fn free(raw: *mut Self::Raw) -> c_int {
        // Returns SQLITE_BUSY while statements are outstanding. Every NativeStatement holds
        // an Arc to its connection, so none can be.
        unsafe { ffi::sqlite3_close(raw) }
    }
}

/// `sqlite3_stmt*`.
#[derive(Debug)]
pub enum StatementKind {}

impl HandleKind for StatementKind {
    type Raw = ffi::sqlite3_stmt;
    const NAME: &'static str = "statement";

    unsafe fn free(raw: *mut Self::Raw) -> c_int {
        unsafe { ffi::sqlite3_finalize(raw) }
    }
}

/// Engine-allocated error text, such as the message buffer filled by `sqlite3_exec`.
#[derive(Debug)]
pub enum ErrorMessageKind {}

impl HandleKind for ErrorMessageKind {
    type Raw = c_char;
    const NAME: &'static str = "error_message";

    unsafe fn free(raw: *mut Self::Raw) -> c_int {
        unsafe { ffi::sqlite3_free(raw.cast::<c_void>()) };
        ffi::SQLITE_OK
    }
}

/// Owner of one native handle.
///
/// A handle is either live (non-null) or released (null). Dropping a live handle releases
/// it and logs at debug level, since every owner in the crate is expected to release
/// explicitly on its normal path.
pub struct NativeHandle<K: HandleKind> {
    raw: *mut K::Raw,
    _kind: PhantomData<K>,
}

impl<K: HandleKind> NativeHandle<K> {
    /// Takes ownership of a raw handle. A null pointer yields a released handle.
    ///
    /// # Safety
    ///
    /// A non-null `raw` must be a live handle of kind `K` that nothing else will free.
    pub const unsafe fn from_raw(raw: *mut K::Raw) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// A handle that owns nothing.
    #[must_use]
    pub const fn released() -> Self {
        Self {
            raw: ptr::null_mut(),
            _kind: PhantomData,
        }
    }

    /// Returns the raw pointer, or null once released.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut K::Raw {
        self.raw
    }

    /// Returns true while the handle owns a native resource.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.raw.is_null()
    }

    /// Frees the handle if it is live. Returns true when a free call was made.
    pub fn release(&mut self) -> bool {
        self.release_via("explicit")
    }

    fn release_via(&mut self, path: &'static str) -> bool {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        if raw.is_null() {
            return false;
        }
        // SAFETY: `raw` was live and owned by this guard, and the field is already null,
        // so no other path can reach it again.
        let rc = unsafe { K::free(raw) };
        if rc != ffi::SQLITE_OK {
            warn!(kind = K::NAME, rc, "Native free call returned non-OK code");
        }
        metrics::counter!(
            "sqlbridge_native_handles_released_total",
            "kind" => K::NAME,
            "path" => path
        )
        .increment(1);
        true
    }
}

impl<K: HandleKind> Drop for NativeHandle<K> {
    fn drop(&mut self) {
        if self.is_live() {
            debug!(kind = K::NAME, "Native handle released on drop without explicit release");
            self.release_via("drop");
        }
    }
}

impl<K: HandleKind> fmt::Debug for NativeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &K::NAME)
            .field("live", &self.is_live())
            .finish()
    }
}

impl<K: HandleKind> Default for NativeHandle<K> {
    fn default() -> Self {
        Self::released()
    }
}
