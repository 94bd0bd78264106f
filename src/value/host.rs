//! Host-side values and their conversion to and from [`SqlValue`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::sql::{SqlType, SqlValue};
use crate::{Error, Result};

/// Text layout used for timestamps stored as TEXT.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[allow(clippy::cast_precision_loss)]
const I64_MIN_F: f64 = i64::MIN as f64;

/// Layouts accepted when parsing timestamp text back, in order.
const TIMESTAMP_PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// A value as the host application hands it to a command.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Absent value.
    Null,
    /// Boolean, stored as `0`/`1`.
    Bool(bool),
    /// Signed integer of any width.
    Int(i64),
    /// Unsigned integer of any width; must fit in `i64`.
    UInt(u64),
    /// Floating-point value.
    Float(f64),
    /// Text.
    Text(String),
    /// Byte sequence.
    Bytes(Vec<u8>),
    /// Timestamp without offset.
    Timestamp(NaiveDateTime),
    /// Timestamp with a fixed UTC offset.
    TimestampTz(DateTime<FixedOffset>),
    /// UUID.
    Uuid(Uuid),
}

/// Host type requested when decoding a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    /// `bool`.
    Bool,
    /// `i8`.
    I8,
    /// `i16`.
    I16,
    /// `i32`.
    I32,
    /// `i64`.
    I64,
    /// `u8`.
    U8,
    /// `u16`.
    U16,
    /// `u32`.
    U32,
    /// `u64`.
    U64,
    /// `f32`.
    F32,
    /// `f64`.
    F64,
    /// `String`.
    Text,
    /// `Vec<u8>`.
    Bytes,
    /// `NaiveDateTime`.
    Timestamp,
    /// `DateTime<FixedOffset>`.
    TimestampTz,
    /// `Uuid`.
    Uuid,
}

impl HostType {
    /// Returns the host type a storage class decodes to when no other type is requested.
    #[must_use]
    pub const fn natural(sql_type: SqlType) -> Option<Self> {
        match sql_type {
            SqlType::Null => None,
            SqlType::Integer => Some(Self::I64),
            SqlType::Real => Some(Self::F64),
            SqlType::Text => Some(Self::Text),
            SqlType::Blob => Some(Self::Bytes),
        }
    }
}

/// Converts a host value to its storage class.
///
/// # Errors
///
/// Returns [`Error::Binding`] when an unsigned value does not fit in 64-bit signed storage.
/// The parameter label is `value`; commands relabel it with the parameter's name.
pub fn encode(value: &HostValue) -> Result<SqlValue> {
    Ok(match value {
        HostValue::Null => SqlValue::Null,
        HostValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        HostValue::Int(n) => SqlValue::Integer(*n),
        HostValue::UInt(n) => SqlValue::Integer(i64::try_from(*n).map_err(|_| {
            Error::binding("value", format!("unsigned value {n} exceeds INTEGER range"))
        })?),
        HostValue::Float(f) => SqlValue::Real(*f),
        HostValue::Text(s) => SqlValue::Text(s.clone()),
        HostValue::Bytes(b) => SqlValue::Blob(b.clone()),
        HostValue::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        HostValue::TimestampTz(ts) => {
            SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, false))
        },
        HostValue::Uuid(id) => SqlValue::Text(id.hyphenated().to_string()),
    })
}

/// Converts a stored value into the requested host type.
///
/// `NULL` decodes to [`HostValue::Null`] regardless of the target.
/// Integer narrowing errors on overflow rather than saturating.
///
/// # Errors
///
/// Returns [`Error::Conversion`] when the value cannot be represented as `target`.
pub fn decode(value: &SqlValue, target: HostType) -> Result<HostValue> {
    if value.is_null() {
        return Ok(HostValue::Null);
    }
    Ok(match target {
        HostType::Bool => HostValue::Bool(to_bool(value)?),
        HostType::I8 => HostValue::Int(i64::from(narrow::<i8>(value)?)),
        HostType::I16 => HostValue::Int(i64::from(narrow::<i16>(value)?)),
        HostType::I32 => HostValue::Int(i64::from(narrow::<i32>(value)?)),
        HostType::I64 => HostValue::Int(to_i64(value)?),
        HostType::U8 => HostValue::UInt(u64::from(narrow::<u8>(value)?)),
        HostType::U16 => HostValue::UInt(u64::from(narrow::<u16>(value)?)),
        HostType::U32 => HostValue::UInt(u64::from(narrow::<u32>(value)?)),
        HostType::U64 => HostValue::UInt(narrow::<u64>(value)?),
        HostType::F32 => HostValue::Float(f64::from(to_f32(value)?)),
        HostType::F64 => HostValue::Float(to_f64(value)?),
        HostType::Text => HostValue::Text(to_text(value)?),
        HostType::Bytes => HostValue::Bytes(to_bytes(value)?),
        HostType::Timestamp => HostValue::Timestamp(to_timestamp(value)?),
        HostType::TimestampTz => HostValue::TimestampTz(to_timestamp_tz(value)?),
        HostType::Uuid => HostValue::Uuid(to_uuid(value)?),
    })
}

fn mismatch(value: &SqlValue, target: &str) -> Error {
    Error::Conversion(format!("cannot read {} value as {target}", value.sql_type()))
}

fn to_bool(value: &SqlValue) -> Result<bool> {
    match value {
        SqlValue::Integer(n) => Ok(*n != 0),
        SqlValue::Real(f) => Ok(*f != 0.0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(Error::Conversion(format!("'{s}' is not a boolean"))),
        },
        _ => Err(mismatch(value, "bool")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i64(value: &SqlValue) -> Result<i64> {
    match value {
        SqlValue::Integer(n) => Ok(*n),
        // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive.
        SqlValue::Real(f) if f.fract() == 0.0 && *f >= I64_MIN_F && *f < -I64_MIN_F => {
            Ok(*f as i64)
        },
        SqlValue::Real(f) => Err(Error::Conversion(format!("{f} is not an exact integer"))),
        SqlValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Conversion(format!("'{s}' is not an integer: {e}"))),
        _ => Err(mismatch(value, "integer")),
    }
}

fn narrow<T>(value: &SqlValue) -> Result<T>
where
    T: TryFrom<i64>,
{
    let wide = to_i64(value)?;
    T::try_from(wide).map_err(|_| {
        Error::Conversion(format!(
            "{wide} is out of range for {}",
            std::any::type_name::<T>()
        ))
    })
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: &SqlValue) -> Result<f64> {
    match value {
        SqlValue::Real(f) => Ok(*f),
        SqlValue::Integer(n) => Ok(*n as f64),
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Conversion(format!("'{s}' is not a number: {e}"))),
        _ => Err(mismatch(value, "float")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: &SqlValue) -> Result<f32> {
    let wide = to_f64(value)?;
    if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
        return Err(Error::Conversion(format!("{wide} is out of range for f32")));
    }
    Ok(wide as f32)
}

fn to_text(value: &SqlValue) -> Result<String> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        SqlValue::Integer(n) => Ok(n.to_string()),
        SqlValue::Real(f) => Ok(f.to_string()),
        SqlValue::Blob(b) => String::from_utf8(b.clone())
            .map_err(|e| Error::Conversion(format!("BLOB is not valid UTF-8: {e}"))),
        SqlValue::Null => Err(mismatch(value, "text")),
    }
}

fn to_bytes(value: &SqlValue) -> Result<Vec<u8>> {
    match value {
        SqlValue::Blob(b) => Ok(b.clone()),
        SqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(mismatch(value, "bytes")),
    }
}

fn to_timestamp(value: &SqlValue) -> Result<NaiveDateTime> {
    match value {
        SqlValue::Text(s) => parse_timestamp(s.trim()),
        SqlValue::Integer(secs) => DateTime::from_timestamp(*secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| Error::Conversion(format!("{secs} is out of timestamp range"))),
        _ => Err(mismatch(value, "timestamp")),
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    for format in TIMESTAMP_PARSE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_utc());
    }
    Err(Error::Conversion(format!("'{text}' is not a timestamp")))
}

fn to_timestamp_tz(value: &SqlValue) -> Result<DateTime<FixedOffset>> {
    if let SqlValue::Text(s) = value
        && let Ok(ts) = DateTime::parse_from_rfc3339(s.trim())
    {
        return Ok(ts);
    }
    to_timestamp(value).map(|naive| naive.and_utc().fixed_offset())
}

fn to_uuid(value: &SqlValue) -> Result<Uuid> {
    match value {
        SqlValue::Text(s) => Uuid::parse_str(s.trim())
            .map_err(|e| Error::Conversion(format!("'{s}' is not a UUID: {e}"))),
        SqlValue::Blob(b) => Uuid::from_slice(b)
            .map_err(|e| Error::Conversion(format!("BLOB is not a UUID: {e}"))),
        _ => Err(mismatch(value, "uuid")),
    }
}

impl From<SqlValue> for HostValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(n) => Self::Int(n),
            SqlValue::Real(f) => Self::Float(f),
            SqlValue::Text(s) => Self::Text(s),
            SqlValue::Blob(b) => Self::Bytes(b),
        }
    }
}

macro_rules! host_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

host_from!(Int: i8, i16, i32, i64);
host_from!(UInt: u8, u16, u32, u64);
host_from!(Float: f32, f64);
host_from!(Text: String, &str);
host_from!(Bytes: Vec<u8>, &[u8]);

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDateTime> for HostValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for HostValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value.naive_utc())
    }
}

impl From<DateTime<FixedOffset>> for HostValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::TimestampTz(value)
    }
}

impl From<Uuid> for HostValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Types that can be read out of a column value.
///
/// `NULL` is only accepted by `Option<T>` and [`SqlValue`]; every other implementation
/// returns [`Error::Conversion`] for it.
pub trait FromSqlValue: Sized {
    /// Converts a stored value into `Self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] when the value cannot be represented as `Self`.
    fn from_sql_value(value: &SqlValue) -> Result<Self>;
}

fn reject_null(value: &SqlValue, target: &str) -> Result<()> {
    if value.is_null() {
        return Err(Error::Conversion(format!("unexpected NULL reading {target}")));
    }
    Ok(())
}

macro_rules! from_sql_narrow {
    ($($ty:ty),+) => {
        $(
            impl FromSqlValue for $ty {
                fn from_sql_value(value: &SqlValue) -> Result<Self> {
                    reject_null(value, stringify!($ty))?;
                    narrow::<$ty>(value)
                }
            }
        )+
    };
}

from_sql_narrow!(i8, i16, i32, u8, u16, u32, u64);

macro_rules! from_sql_via {
    ($($ty:ty => $conv:ident),+ $(,)?) => {
        $(
            impl FromSqlValue for $ty {
                fn from_sql_value(value: &SqlValue) -> Result<Self> {
                    reject_null(value, stringify!($ty))?;
                    $conv(value)
                }
            }
        )+
    };
}

from_sql_via!(
    bool => to_bool,
    i64 => to_i64,
    f32 => to_f32,
    f64 => to_f64,
    String => to_text,
    Vec<u8> => to_bytes,
    NaiveDateTime => to_timestamp,
    DateTime<FixedOffset> => to_timestamp_tz,
    Uuid => to_uuid,
);

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        reject_null(value, "DateTime<Utc>")?;
        to_timestamp_tz(value).map(|ts| ts.with_timezone(&Utc))
    }
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromSqlValue for HostValue {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        Ok(Self::from(value.clone()))
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_sql_value(value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn sample_timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_milli_opt(14, 5, 7, 250))
            .unwrap_or_default()
    }

    #[test]
    fn test_bool_encodes_as_integer() {
        assert_eq!(encode(&true.into()).unwrap(), SqlValue::Integer(1));
        assert_eq!(encode(&false.into()).unwrap(), SqlValue::Integer(0));
    }

    #[test]
    fn test_integer_stays_integer_unless_bool_requested() {
        let stored = SqlValue::Integer(1);
        assert_eq!(decode(&stored, HostType::I64).unwrap(), HostValue::Int(1));
        assert_eq!(decode(&stored, HostType::Bool).unwrap(), HostValue::Bool(true));
    }

    #[test]
    fn test_narrowing_overflow_errors() {
        let stored = SqlValue::Integer(300);
        assert!(matches!(decode(&stored, HostType::U8), Err(Error::Conversion(_))));
        assert!(matches!(i8::from_sql_value(&stored), Err(Error::Conversion(_))));
        assert_eq!(i16::from_sql_value(&stored).unwrap(), 300);
        assert!(u32::from_sql_value(&SqlValue::Integer(-1)).is_err());
    }

    #[test]
    fn test_unsigned_overflow_is_binding_error() {
        let err = encode(&HostValue::UInt(u64::MAX)).unwrap_err();
        assert!(matches!(err, Error::Binding { .. }));
        assert_eq!(
            encode(&HostValue::UInt(42)).unwrap(),
            SqlValue::Integer(42)
        );
    }

    #[test]
    fn test_timestamp_text_layout() {
        let encoded = encode(&sample_timestamp().into()).unwrap();
        assert_eq!(encoded, SqlValue::Text("2024-03-09 14:05:07.250".to_string()));
        assert_eq!(
            NaiveDateTime::from_sql_value(&encoded).unwrap(),
            sample_timestamp()
        );
    }

    #[test]
    fn test_timestamp_accepts_date_only_and_iso_t() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 9)
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap();
        assert_eq!(
            NaiveDateTime::from_sql_value(&SqlValue::Text("2024-03-09".into())).unwrap(),
            midnight
        );
        assert_eq!(
            NaiveDateTime::from_sql_value(&SqlValue::Text("2024-03-09T00:00:00".into()))
                .unwrap(),
            midnight
        );
    }

    #[test]
    fn test_malformed_timestamp_errors() {
        let bad = SqlValue::Text("yesterday".into());
        assert!(matches!(
            decode(&bad, HostType::Timestamp),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn test_timestamp_with_offset_round_trips() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let encoded = encode(&ts.into()).unwrap();
        assert_eq!(
            DateTime::<FixedOffset>::from_sql_value(&encoded).unwrap(),
            ts
        );
    }

    #[test]
    fn test_uuid_hyphenated_round_trip() {
        let id = Uuid::new_v4();
        let encoded = encode(&id.into()).unwrap();
        assert_eq!(encoded.as_str(), Some(id.hyphenated().to_string().as_str()));
        assert_eq!(Uuid::from_sql_value(&encoded).unwrap(), id);
        assert!(Uuid::from_sql_value(&SqlValue::Text("not-a-uuid".into())).is_err());
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(decode(&SqlValue::Null, HostType::I32).unwrap(), HostValue::Null);
        assert!(i64::from_sql_value(&SqlValue::Null).is_err());
        assert_eq!(Option::<i64>::from_sql_value(&SqlValue::Null).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_sql_value(&SqlValue::Integer(3)).unwrap(),
            Some(3)
        );
        assert_eq!(HostValue::from(None::<i32>), HostValue::Null);
    }

    #[test]
    fn test_real_to_integer_requires_exact_value() {
        assert_eq!(i64::from_sql_value(&SqlValue::Real(4.0)).unwrap(), 4);
        assert!(i64::from_sql_value(&SqlValue::Real(4.5)).is_err());
        assert!(i64::from_sql_value(&SqlValue::Real(f64::NAN)).is_err());
    }

    #[test]
    fn test_storage_class_round_trip() {
        let values = [
            SqlValue::Null,
            SqlValue::Integer(i64::MIN),
            SqlValue::Real(-0.125),
            SqlValue::Text("héllo".into()),
            SqlValue::Blob(vec![0, 255, 7]),
        ];
        for value in values {
            assert_eq!(encode(&HostValue::from(value.clone())).unwrap(), value);
        }
    }
}
