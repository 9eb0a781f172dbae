//! Parameter binding and row mapping for the MySQL and SQLite drivers.
//!
//! Rows come back as JSON objects keyed by column name, so route handlers can
//! shape responses without knowing the backend's native types. Columns are
//! mapped by their reported type name; exact numerics and temporal values
//! become strings so no precision is lost.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use sqlx::mysql::{MySqlQueryResult, MySqlRow};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Column, Database, Encode, Row, Type, TypeInfo, ValueRef};

/// A result row: column name -> value.
pub type SqlRow = Map<String, JsonValue>;

/// Outcome of an INSERT/UPDATE/DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
}

impl From<MySqlQueryResult> for ExecResult {
    fn from(done: MySqlQueryResult) -> Self {
        let id = done.last_insert_id();
        Self {
            affected_rows: done.rows_affected(),
            last_insert_id: (id != 0).then(|| i64::try_from(id).unwrap_or(i64::MAX)),
        }
    }
}

impl From<SqliteQueryResult> for ExecResult {
    fn from(done: SqliteQueryResult) -> Self {
        let id = done.last_insert_rowid();
        Self {
            affected_rows: done.rows_affected(),
            last_insert_id: (id != 0).then_some(id),
        }
    }
}

/// Bind JSON parameters positionally.
///
/// Arrays and objects are bound as their JSON text; integers that do not fit
/// `i64` are bound as floats.
pub(crate) fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &[JsonValue],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            JsonValue::Null => query.bind(Option::<String>::None),
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

pub(crate) fn mysql_row_to_map(row: &MySqlRow) -> Result<SqlRow, sqlx::Error> {
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), mysql_value(row, idx)?);
    }
    Ok(map)
}

fn mysql_value(row: &MySqlRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" => JsonValue::Bool(row.try_get_unchecked::<bool, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            JsonValue::from(row.try_get_unchecked::<i64, _>(idx)?)
        }
        name if name.ends_with(" UNSIGNED") => JsonValue::from(row.try_get_unchecked::<u64, _>(idx)?),
        "FLOAT" => float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => float(row.try_get_unchecked::<f64, _>(idx)?),
        // DECIMAL travels as text in both protocols.
        "DECIMAL" => JsonValue::String(row.try_get_unchecked::<String, _>(idx)?),
        "DATE" => JsonValue::String(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        "DATETIME" | "TIMESTAMP" => JsonValue::String(row.try_get::<NaiveDateTime, _>(idx)?.to_string()),
        "TIME" => JsonValue::String(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "JSON" => row.try_get::<JsonValue, _>(idx)?,
        "BIT" | "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY" => {
            bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?)
        }
        _ => JsonValue::String(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

pub(crate) fn sqlite_row_to_map(row: &SqliteRow) -> Result<SqlRow, sqlx::Error> {
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), sqlite_value(row, idx)?);
    }
    Ok(map)
}

/// SQLite reports the storage class of each value, not the declared column type.
fn sqlite_value(row: &SqliteRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" | "BIGINT" | "BOOLEAN" => JsonValue::from(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => float(row.try_get_unchecked::<f64, _>(idx)?),
        "BLOB" => bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        "TEXT" | "DATE" | "TIME" | "DATETIME" => JsonValue::String(row.try_get_unchecked::<String, _>(idx)?),
        other => {
            return Err(sqlx::Error::Decode(
                format!("column '{}' has unsupported type {other}", row.columns()[idx].name()).into(),
            ));
        }
    };
    Ok(value)
}

fn float(v: f64) -> JsonValue {
    Number::from_f64(v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

/// UTF-8 payloads become strings; anything else an array of byte values.
fn bytes(v: Vec<u8>) -> JsonValue {
    match String::from_utf8(v) {
        Ok(text) => JsonValue::String(text),
        Err(e) => JsonValue::Array(e.into_bytes().into_iter().map(JsonValue::from).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_utf8_bytes_become_an_array() {
        assert_eq!(bytes(b"suite".to_vec()), JsonValue::String("suite".into()));
        assert_eq!(bytes(vec![0xff, 0x01]), serde_json::json!([255, 1]));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(float(f64::NAN), JsonValue::Null);
        assert_eq!(float(1.5), serde_json::json!(1.5));
    }
}
