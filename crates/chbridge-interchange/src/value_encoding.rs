//! Textual encoding of values for delimited files
//!
//! Export renders each [`Value`] as a field; import parses a field back into a
//! [`Value`] of the target column's type. An empty field is NULL in both
//! directions.

use chbridge_core::{ColumnType, Value};
use chrono::{NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Render a value as a flat-file field.
///
/// Floats with no fractional part keep a trailing `.0` so the column still
/// reads as numeric-with-decimals on re-import. Sub-second precision is only
/// written when present.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) => encode_float(*f),
        Value::String(s) => s.clone(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
    }
}

fn encode_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Parse a field as `column_type`. `None` means the text is not a valid value
/// of that type.
pub fn coerce_field(raw: &str, column_type: ColumnType) -> Option<Value> {
    if raw.is_empty() {
        return Some(Value::Null);
    }
    match column_type {
        ColumnType::Integer => raw.trim().parse::<i64>().ok().map(Value::Int64),
        ColumnType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| !f.is_nan() || raw.trim().eq_ignore_ascii_case("nan"))
            .map(Value::Float64),
        ColumnType::Boolean => parse_bool(raw.trim()).map(Value::Bool),
        ColumnType::DateTime => parse_datetime(raw.trim()).map(Value::DateTime),
        ColumnType::String | ColumnType::Unknown => Some(Value::String(raw.to_string())),
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a timestamp or a bare date (taken as midnight)
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
