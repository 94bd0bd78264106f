//! Value conversion between host values and SQL storage classes.
//!
//! Every value crossing a transport boundary is first normalized to a [`SqlValue`],
//! one of the five SQLite storage classes. From there:
//!
//! - [`native`] selects the `sqlite3_bind_*` call and the raw bytes to hand to it.
//! - [`json`] produces the tagged `{type, value|base64}` argument of the pipeline protocol.
//! - [`host`] converts to and from the host-side [`HostValue`] / [`FromSqlValue`] types.
//!
//! ## Conversion rules
//!
//! | Host | Storage class | Notes |
//! |------|---------------|-------|
//! | `bool` | INTEGER | `0`/`1`; decodes back to `bool` only when asked for one |
//! | signed/unsigned integers | INTEGER | narrowing on decode errors on overflow |
//! | `f32`/`f64` | REAL | |
//! | `NaiveDateTime`, `DateTime<Utc>` | TEXT | `yyyy-MM-dd HH:mm:ss.fff` |
//! | `DateTime<FixedOffset>` | TEXT | RFC 3339 |
//! | `Uuid` | TEXT | canonical hyphenated form |
//! | bytes | BLOB | base64 on the HTTP wire |
//! | `None` / null | NULL | |

pub mod host;
pub mod json;
pub mod native;
mod sql;

pub use host::{FromSqlValue, HostType, HostValue, TIMESTAMP_FORMAT, decode, encode};
pub use json::{WireValue, ensure_sendable, from_wire, to_json_arg, to_json_args};
pub use native::{NativeBind, to_native_bind};
pub use sql::{SqlType, SqlValue};
