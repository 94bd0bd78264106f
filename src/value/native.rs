//! Bind-call selection for the native engine.

use super::sql::SqlValue;

/// Which `sqlite3_bind_*` call a value needs, with the payload to pass it.
///
/// Text and blob payloads borrow from the source value; the native layer binds them with
/// `SQLITE_TRANSIENT` so the engine takes its own copy before the borrow ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeBind<'a> {
    /// `sqlite3_bind_null`.
    Null,
    /// `sqlite3_bind_int64`.
    Int64(i64),
    /// `sqlite3_bind_double`.
    Double(f64),
    /// `sqlite3_bind_text` with explicit byte length.
    Text(&'a str),
    /// `sqlite3_bind_blob` with explicit byte length.
    Blob(&'a [u8]),
}

impl NativeBind<'_> {
    /// Name of the native bind function, for diagnostics.
    #[must_use]
    pub const fn function_name(&self) -> &'static str {
        match self {
            Self::Null => "sqlite3_bind_null",
            Self::Int64(_) => "sqlite3_bind_int64",
            Self::Double(_) => "sqlite3_bind_double",
            Self::Text(_) => "sqlite3_bind_text",
            Self::Blob(_) => "sqlite3_bind_blob",
        }
    }

    /// Raw bytes handed to the engine; empty for the fixed-width and null calls.
    #[must_use]
    pub const fn raw_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Blob(b) => b,
            Self::Null | Self::Int64(_) | Self::Double(_) => &[],
        }
    }
}

/// Selects the bind call for a value.
#[must_use]
pub fn to_native_bind(value: &SqlValue) -> NativeBind<'_> {
    match value {
        SqlValue::Null => NativeBind::Null,
        SqlValue::Integer(n) => NativeBind::Int64(*n),
        SqlValue::Real(f) => NativeBind::Double(*f),
        SqlValue::Text(s) => NativeBind::Text(s),
        SqlValue::Blob(b) => NativeBind::Blob(b),
    }
}
