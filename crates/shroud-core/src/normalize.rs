//! Value normalization: generic mirrored values back to column storage types.
//!
//! Mirrored rows travel as JSON, so an integer column may come back as a
//! string or a float and a date column may hold offset-aware text. Values are
//! coerced to the column's declared semantic type while keeping the layout
//! they were read in: a date-only value stays a date, an epoch integer stays
//! an integer, and local timestamp text is written back as it was. Only
//! offset-aware and zoned timestamps are rewritten, as UTC.
//! Anything that cannot be coerced is passed through untouched so the
//! database's own coercion gets the last word.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::value::{column_key, RowValue};

/// Timestamp text layout written back to the database.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Date-only text layout written back to the database.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A value ready to bind against a column.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl StorageValue {
    /// Canonical text for a timestamp, `yyyy-MM-dd HH:mm:ss[.fff]`.
    pub fn timestamp_text(ts: &NaiveDateTime) -> String {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Canonical text for a date, `yyyy-MM-dd`.
    pub fn date_text(date: &NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }
}

/// A parsed timestamp, tagged with the layout it was written in.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParsedTimestamp {
    /// Offset-aware or zoned, converted to UTC.
    Offset(NaiveDateTime),
    /// Local date and time without an offset.
    Local(NaiveDateTime),
    DateOnly(NaiveDate),
}

impl ParsedTimestamp {
    fn naive(self) -> Option<NaiveDateTime> {
        match self {
            Self::Offset(ts) | Self::Local(ts) => Some(ts),
            Self::DateOnly(d) => d.and_hms_opt(0, 0, 0),
        }
    }
}

/// Coerce `raw` to the storage type declared for `column`.
///
/// Membership in `date_columns` / `int_columns` is decided by [`column_key`],
/// so rule authors need not match the source casing.
pub fn to_storage_type(
    column: &str,
    raw: &RowValue,
    date_columns: &[String],
    int_columns: &[String],
) -> StorageValue {
    if raw.is_null() {
        return StorageValue::Null;
    }
    let key = column_key(column);
    if date_columns.iter().any(|c| column_key(c) == key) {
        return normalize_date(column, raw);
    }
    if int_columns.iter().any(|c| column_key(c) == key) {
        return normalize_int(raw);
    }
    passthrough(raw)
}

fn passthrough(raw: &RowValue) -> StorageValue {
    match raw {
        RowValue::Null => StorageValue::Null,
        RowValue::Bool(b) => StorageValue::Integer(i64::from(*b)),
        RowValue::Integer(i) => StorageValue::Integer(*i),
        RowValue::Real(r) => StorageValue::Real(*r),
        RowValue::Text(s) => StorageValue::Text(s.clone()),
    }
}

fn normalize_date(column: &str, raw: &RowValue) -> StorageValue {
    let RowValue::Text(s) = raw else {
        // Epoch integers and reals are already in the column's storage class.
        return passthrough(raw);
    };
    match parse_layout(s) {
        Some(ParsedTimestamp::Offset(ts)) => StorageValue::Timestamp(ts),
        Some(ParsedTimestamp::DateOnly(d)) => StorageValue::Date(d),
        Some(ParsedTimestamp::Local(_)) => StorageValue::Text(s.clone()),
        None => {
            warn!(
                "Date column {}: unrecognized timestamp layout, passing through",
                column
            );
            passthrough(raw)
        }
    }
}

/// Parse offset-aware, zoned, or naive timestamp text.
///
/// Offset-aware inputs are converted to UTC. A trailing `[Zone/Id]` is
/// ignored; the numeric offset before it is authoritative. A date-only
/// input yields midnight.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    parse_layout(text).and_then(ParsedTimestamp::naive)
}

fn parse_layout(text: &str) -> Option<ParsedTimestamp> {
    let mut s = text.trim();
    if s.is_empty() {
        return None;
    }
    if s.ends_with(']') {
        if let Some(open) = s.find('[') {
            s = &s[..open];
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ParsedTimestamp::Offset(dt.naive_utc()));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ParsedTimestamp::Local(ts));
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(ParsedTimestamp::DateOnly)
}

fn normalize_int(raw: &RowValue) -> StorageValue {
    match raw {
        RowValue::Integer(i) => StorageValue::Integer(*i),
        RowValue::Bool(b) => StorageValue::Integer(i64::from(*b)),
        RowValue::Real(r) if r.fract() == 0.0 && r.is_finite() => {
            // Whole-valued floats inside i64 range come back as integers.
            if *r >= i64::MIN as f64 && *r <= i64::MAX as f64 {
                StorageValue::Integer(*r as i64)
            } else {
                StorageValue::Real(*r)
            }
        }
        RowValue::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => StorageValue::Integer(i),
            Err(_) => StorageValue::Text(s.clone()),
        },
        _ => passthrough(raw),
    }
}
