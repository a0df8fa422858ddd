//! Mapping between ClickHouse types, JSON cells and chbridge values

use chbridge_core::{ColumnDef, ColumnType, Value};
use chrono::{NaiveDate, NaiveDateTime};

/// Strip `Nullable(..)` and `LowCardinality(..)` wrappers.
/// Returns the inner type and whether the column is nullable.
pub fn unwrap_type(data_type: &str) -> (&str, bool) {
    let mut inner = data_type.trim();
    let mut nullable = false;
    loop {
        if let Some(rest) = strip_wrapper(inner, "Nullable") {
            nullable = true;
            inner = rest;
        } else if let Some(rest) = strip_wrapper(inner, "LowCardinality") {
            inner = rest;
        } else {
            return (inner, nullable);
        }
    }
}

fn strip_wrapper<'a>(data_type: &'a str, wrapper: &str) -> Option<&'a str> {
    data_type
        .strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Classify a native ClickHouse type into a logical column type
pub fn column_type_of(data_type: &str) -> ColumnType {
    let (inner, _) = unwrap_type(data_type);
    let base = inner.split('(').next().unwrap_or(inner);
    match base {
        "Int8" | "Int16" | "Int32" | "Int64" | "Int128" | "Int256" | "UInt8" | "UInt16"
        | "UInt32" | "UInt64" | "UInt128" | "UInt256" => ColumnType::Integer,
        "Float32" | "Float64" | "BFloat16" | "Decimal" | "Decimal32" | "Decimal64"
        | "Decimal128" | "Decimal256" => ColumnType::Float,
        "Bool" | "Boolean" => ColumnType::Boolean,
        "Date" | "Date32" | "DateTime" | "DateTime64" => ColumnType::DateTime,
        "String" | "FixedString" | "UUID" | "Enum8" | "Enum16" | "IPv4" | "IPv6" => {
            ColumnType::String
        }
        _ => ColumnType::Unknown,
    }
}

/// Build a column definition from a `system.columns` row
pub fn column_def(name: &str, data_type: &str) -> ColumnDef {
    let (_, nullable) = unwrap_type(data_type);
    ColumnDef::new(name, column_type_of(data_type)).with_data_type(data_type, nullable)
}

/// Native type used when creating a column
pub fn ddl_type(column: &ColumnDef) -> String {
    let base = match column.column_type {
        ColumnType::Integer => "Int64",
        ColumnType::Float => "Float64",
        ColumnType::Boolean => "Bool",
        ColumnType::DateTime => "DateTime64(3)",
        ColumnType::String => "String",
        ColumnType::Unknown => {
            return column
                .data_type
                .clone()
                .unwrap_or_else(|| "Nullable(String)".to_string());
        }
    };
    format!("Nullable({})", base)
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Convert one JSONEachRow cell into a value of the column's logical type.
///
/// ClickHouse quotes 64-bit integers and prints integral floats without a
/// fraction, so the declared type decides the conversion rather than the
/// JSON shape.
pub fn json_to_value(json: &serde_json::Value, column_type: ColumnType) -> Value {
    use serde_json::Value as Json;

    match (json, column_type) {
        (Json::Null, _) => Value::Null,
        (Json::Number(n), ColumnType::Integer) => n
            .as_i64()
            .map(Value::Int64)
            .unwrap_or_else(|| Value::String(n.to_string())),
        (Json::String(s), ColumnType::Integer) => s
            .parse::<i64>()
            .map(Value::Int64)
            .unwrap_or_else(|_| Value::String(s.clone())),
        (Json::Number(n), ColumnType::Float) => n
            .as_f64()
            .map(Value::Float64)
            .unwrap_or_else(|| Value::String(n.to_string())),
        (Json::String(s), ColumnType::Float) => s
            .parse::<f64>()
            .map(Value::Float64)
            .unwrap_or_else(|_| Value::String(s.clone())),
        (Json::Bool(b), _) => Value::Bool(*b),
        (Json::Number(n), ColumnType::Boolean) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (Json::String(s), ColumnType::DateTime) => parse_datetime(s),
        (Json::Number(n), _) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n
                .as_f64()
                .map(Value::Float64)
                .unwrap_or_else(|| Value::String(n.to_string())),
        },
        (Json::String(s), _) => Value::String(s.clone()),
        (other, _) => Value::String(other.to_string()),
    }
}

fn parse_datetime(raw: &str) -> Value {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Value::DateTime(dt);
        }
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Value::Date(date),
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Convert a value into the JSON accepted by `INSERT ... FORMAT JSONEachRow`
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int64(i) => Json::from(*i),
        Value::Float64(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String(f.to_string())),
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Json::String(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
    }
}

/// Convert a value for a destination column, formatting temporal values the
/// way the column's native type parses them
pub fn cell_to_json(column: &ColumnDef, value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    let native = column
        .data_type
        .as_deref()
        .map(|t| unwrap_type(t).0)
        .unwrap_or_default();
    let base = native.split('(').next().unwrap_or(native);
    match (value, base) {
        (Value::DateTime(dt), "Date" | "Date32") => {
            Json::String(dt.date().format("%Y-%m-%d").to_string())
        }
        (Value::DateTime(dt), "DateTime") => {
            Json::String(dt.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        (Value::Date(d), "DateTime" | "DateTime64") => {
            Json::String(d.format("%Y-%m-%d 00:00:00").to_string())
        }
        _ => value_to_json(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_type() {
        assert_eq!(unwrap_type("Nullable(Int64)"), ("Int64", true));
        assert_eq!(unwrap_type("LowCardinality(Nullable(String))"), ("String", true));
        assert_eq!(unwrap_type("DateTime64(3, 'UTC')"), ("DateTime64(3, 'UTC')", false));
    }

    #[test]
    fn test_column_type_of() {
        assert_eq!(column_type_of("UInt32"), ColumnType::Integer);
        assert_eq!(column_type_of("Nullable(Float64)"), ColumnType::Float);
        assert_eq!(column_type_of("Decimal(10, 2)"), ColumnType::Float);
        assert_eq!(column_type_of("DateTime64(3)"), ColumnType::DateTime);
        assert_eq!(column_type_of("Date"), ColumnType::DateTime);
        assert_eq!(column_type_of("LowCardinality(String)"), ColumnType::String);
        assert_eq!(column_type_of("Bool"), ColumnType::Boolean);
        assert_eq!(column_type_of("Array(UInt8)"), ColumnType::Unknown);
    }

    #[test]
    fn test_ddl_type() {
        let column = ColumnDef::new("id", ColumnType::Integer);
        assert_eq!(ddl_type(&column), "Nullable(Int64)");
        let tags = column_def("tags", "Array(String)");
        assert_eq!(ddl_type(&tags), "Array(String)");
        let untyped = ColumnDef::new("x", ColumnType::Unknown);
        assert_eq!(ddl_type(&untyped), "Nullable(String)");
    }

    #[test]
    fn test_json_to_value_uses_declared_type() {
        assert_eq!(json_to_value(&json!("42"), ColumnType::Integer), Value::Int64(42));
        assert_eq!(json_to_value(&json!(20), ColumnType::Float), Value::Float64(20.0));
        assert_eq!(json_to_value(&json!(1), ColumnType::Boolean), Value::Bool(true));
        assert_eq!(json_to_value(&json!(null), ColumnType::String), Value::Null);
        assert_eq!(
            json_to_value(&json!("18446744073709551615"), ColumnType::Integer),
            Value::String("18446744073709551615".into())
        );
    }

    #[test]
    fn test_json_to_value_datetimes() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(12, 30, 0, 250)
            .unwrap();
        assert_eq!(
            json_to_value(&json!("2024-03-01 12:30:00.250"), ColumnType::DateTime),
            Value::DateTime(dt)
        );
        assert_eq!(
            json_to_value(&json!("2024-03-01"), ColumnType::DateTime),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(&Value::Int64(7)), json!(7));
        assert_eq!(value_to_json(&Value::Null), json!(null));
        assert_eq!(value_to_json(&Value::Float64(f64::NAN)), json!("NaN"));
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(
            value_to_json(&Value::DateTime(dt)),
            json!("2024-03-01 08:00:00.000")
        );
    }

    #[test]
    fn test_cell_to_json_follows_native_type() {
        let at = Value::DateTime(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_milli_opt(8, 15, 30, 500)
                .unwrap(),
        );

        let day = column_def("day", "Date");
        assert_eq!(cell_to_json(&day, &at), json!("2024-03-01"));
        let day32 = column_def("day", "Nullable(Date32)");
        assert_eq!(cell_to_json(&day32, &at), json!("2024-03-01"));

        let seconds = column_def("at", "DateTime('UTC')");
        assert_eq!(cell_to_json(&seconds, &at), json!("2024-03-01 08:15:30"));
        let millis = column_def("at", "DateTime64(3)");
        assert_eq!(cell_to_json(&millis, &at), json!("2024-03-01 08:15:30.500"));

        let inferred = ColumnDef::new("at", ColumnType::DateTime);
        assert_eq!(cell_to_json(&inferred, &at), json!("2024-03-01 08:15:30.500"));
        assert_eq!(cell_to_json(&day, &Value::Null), json!(null));
    }
}
