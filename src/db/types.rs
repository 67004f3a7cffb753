//! Result-row decoding.
//!
//! Column values are classified by their backend type name into a
//! [`TypeCategory`], then decoded by a backend-specific decoder into JSON.
//! Temporal values come back as ISO-8601 strings, DECIMAL/NUMERIC as their
//! exact textual form, binary as base64.

use crate::models::{Column as ResultColumn, DatabaseType, Row as ResultRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    // Before integers: "interval" and "point" contain "int"
    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    // MySQL reports BOOLEAN columns as TINYINT(1); sqlx names them BOOLEAN.
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if (lower.contains("int") || lower.contains("serial") || lower.contains("tiny"))
        && lower != "interval"
        && lower != "point"
    {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" && db == DatabaseType::PostgreSQL {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Unknown
}

/// Raw DECIMAL/NUMERIC value as the backend renders it.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

pub fn format_timestamp(value: DateTime<Utc>) -> JsonValue {
    JsonValue::String(value.to_rfc3339())
}

pub fn format_naive_timestamp(value: NaiveDateTime) -> JsonValue {
    JsonValue::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Convert a backend row into a result row, preserving column order.
pub trait RowDecode {
    fn to_result_row(&self) -> ResultRow;
}

impl RowDecode for MySqlRow {
    fn to_result_row(&self) -> ResultRow {
        ResultRow::new(
            self.columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| {
                    let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                    ResultColumn {
                        name: col.name().to_string(),
                        value: mysql::decode_column(self, idx, category),
                    }
                })
                .collect(),
        )
    }
}

impl RowDecode for PgRow {
    fn to_result_row(&self) -> ResultRow {
        ResultRow::new(
            self.columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| {
                    let category =
                        categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                    ResultColumn {
                        name: col.name().to_string(),
                        value: postgres::decode_column(self, idx, category),
                    }
                })
                .collect(),
        )
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Typed read of one column. NULL and a type mismatch both yield `None`.
fn column<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

/// Zoned timestamp, then naive timestamp, date and time of day.
fn temporal<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> DateTime<Utc>: Decode<'r, R::Database>,
    for<'r> NaiveDateTime: Decode<'r, R::Database>,
    for<'r> NaiveDate: Decode<'r, R::Database>,
    for<'r> NaiveTime: Decode<'r, R::Database>,
    DateTime<Utc>: Type<R::Database>,
    NaiveDateTime: Type<R::Database>,
    NaiveDate: Type<R::Database>,
    NaiveTime: Type<R::Database>,
{
    column::<R, DateTime<Utc>>(row, idx)
        .map(format_timestamp)
        .or_else(|| column::<R, NaiveDateTime>(row, idx).map(format_naive_timestamp))
        .or_else(|| column::<R, NaiveDate>(row, idx).map(|d| JsonValue::String(d.to_string())))
        .or_else(|| column::<R, NaiveTime>(row, idx).map(|t| JsonValue::String(t.to_string())))
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => {
                column::<_, RawDecimal>(row, idx).map(|v| JsonValue::String(v.0))
            }
            // Signed columns decode as i64, UNSIGNED ones only as u64.
            TypeCategory::Integer => column::<_, i64>(row, idx)
                .map(JsonValue::from)
                .or_else(|| column::<_, u64>(row, idx).map(JsonValue::from)),
            TypeCategory::Boolean => column::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float => column::<_, f64>(row, idx)
                .or_else(|| column::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Temporal => temporal(row, idx),
            TypeCategory::Binary => column::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
            TypeCategory::Json => column::<_, JsonValue>(row, idx),
            TypeCategory::Uuid | TypeCategory::Unknown => {
                column::<_, String>(row, idx).map(JsonValue::String)
            }
        };
        value.unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => {
                column::<_, RawDecimal>(row, idx).map(|v| JsonValue::String(v.0))
            }
            // Postgres integer types only decode at their exact width.
            TypeCategory::Integer => column::<_, i16>(row, idx)
                .map(JsonValue::from)
                .or_else(|| column::<_, i32>(row, idx).map(JsonValue::from))
                .or_else(|| column::<_, i64>(row, idx).map(JsonValue::from)),
            TypeCategory::Boolean => column::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float => column::<_, f64>(row, idx)
                .or_else(|| column::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Temporal => {
                temporal(row, idx).or_else(|| column::<_, String>(row, idx).map(JsonValue::String))
            }
            TypeCategory::Binary => column::<_, Vec<u8>>(row, idx).map(|v| encode_binary(&v)),
            TypeCategory::Json => column::<_, JsonValue>(row, idx),
            TypeCategory::Uuid => {
                column::<_, uuid::Uuid>(row, idx).map(|v| JsonValue::String(v.to_string()))
            }
            TypeCategory::Unknown => column::<_, String>(row, idx).map(JsonValue::String),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT UNSIGNED", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT4", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        for name in ["TIMESTAMPTZ", "TIMESTAMP", "DATETIME", "DATE", "TIME"] {
            assert_eq!(
                categorize_type(name, DatabaseType::PostgreSQL),
                TypeCategory::Temporal,
                "{name}"
            );
        }
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::MySQL),
            TypeCategory::Boolean
        );
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("UUID", DatabaseType::PostgreSQL),
            TypeCategory::Uuid
        );
        assert_eq!(
            categorize_type("VARBINARY", DatabaseType::MySQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_binary_is_base64() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_non_finite_float_falls_back_to_text() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
        assert_eq!(float_value(f64::INFINITY), JsonValue::String("inf".to_string()));
    }

    #[test]
    fn test_timestamp_formatting() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            format_timestamp(ts),
            JsonValue::String("2024-05-01T12:30:00+00:00".to_string())
        );
        assert_eq!(
            format_naive_timestamp(ts.naive_utc()),
            JsonValue::String("2024-05-01T12:30:00".to_string())
        );
    }
}
