//! Row decoding for the sqlx-backed drivers.
//!
//! Each engine row is turned into an engine-neutral [`Row`] (column name to
//! JSON value) so no driver type crosses the client boundary. Column types
//! are first classified into a [`TypeCategory`], then decoded per engine.

use crate::models::{DatabaseType, ResultSet, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_ascii_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite NUMERIC affinity stores floats
        return if db == DatabaseType::SQLite {
            TypeCategory::Float
        } else {
            TypeCategory::Decimal
        };
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// DECIMAL/NUMERIC kept as the engine's exact text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_ascii_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        Ok(RawDecimal(<&str as Decode<sqlx::MySql>>::decode(value)?.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_ascii_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        Ok(RawDecimal(<&str as Decode<sqlx::Postgres>>::decode(value)?.to_string()))
    }
}

/// Binary data as UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Conversion of an engine row into an engine-neutral row.
pub trait RowToJson {
    fn column_names(&self) -> Vec<String>;
    fn to_json_row(&self) -> Row;
}

/// Collect decoded rows into a result set, keeping column order.
pub fn to_result_set<R: RowToJson>(rows: &[R]) -> ResultSet {
    let columns = rows.first().map(RowToJson::column_names).unwrap_or_default();
    ResultSet::new(columns, rows.iter().map(RowToJson::to_json_row).collect())
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn column_names(&self) -> Vec<String> {
                self.columns().iter().map(|c| c.name().to_string()).collect()
            }

            fn to_json_row(&self) -> Row {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        (col.name().to_string(), $decoder(self, idx, category))
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to decode DECIMAL");
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, JsonValue::Bool),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .or_else(|| {
                    row.try_get::<Option<f32>, _>(idx)
                        .ok()
                        .flatten()
                        .map(f64::from)
                })
                .map_or(JsonValue::Null, float_value),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, |b| decode_binary_value(&b)),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text | TypeCategory::Null => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, JsonValue::String),
        }
    }

    // MySQL integer columns decode only into the exact width and signedness.
    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        macro_rules! try_int {
            ($($t:ty),+) => {
                $(
                    if let Ok(Some(v)) = row.try_get::<Option<$t>, _>(idx) {
                        return JsonValue::Number(v.into());
                    }
                )+
            };
        }
        try_int!(i64, i32, i16, i8, u64, u32, u16, u8);
        JsonValue::Null
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to decode NUMERIC");
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, JsonValue::Bool),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .or_else(|| {
                    row.try_get::<Option<f32>, _>(idx)
                        .ok()
                        .flatten()
                        .map(f64::from)
                })
                .map_or(JsonValue::Null, float_value),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, |b| decode_binary_value(&b)),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text | TypeCategory::Null => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, JsonValue::String),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed: the declared column type says little about
    /// the stored value, so the runtime storage class decides.
    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => categorize_type(raw.type_info().name(), DatabaseType::SQLite),
            Err(_) => declared,
        };

        match storage {
            TypeCategory::Integer => match row.try_get::<Option<i64>, _>(idx) {
                Ok(Some(v)) if declared == TypeCategory::Boolean => JsonValue::Bool(v != 0),
                Ok(Some(v)) => JsonValue::Number(v.into()),
                _ => JsonValue::Null,
            },
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, float_value),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, |b| decode_binary_value(&b)),
            _ => match row.try_get::<Option<String>, _>(idx) {
                Ok(Some(v)) if declared == TypeCategory::Json => {
                    serde_json::from_str(&v).unwrap_or(JsonValue::String(v))
                }
                Ok(Some(v)) => JsonValue::String(v),
                _ => JsonValue::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal_depends_on_engine() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_fallbacks() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("bytea", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Null
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("hello world".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
    }
}
