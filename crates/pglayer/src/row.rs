//! Row mapping: struct-form and map-form decoding.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::Type;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// A decoded row keyed by server field names.
pub type JsonMap = serde_json::Map<String, Value>;

/// Convert a database row into a Rust struct.
///
/// Implementations are generated by the [`record!`](crate::record) macro and
/// decode by the descriptor's column names, so `column:`/`rename:` overrides
/// are honored.
pub trait FromRow: Sized {
    /// Convert a database row into `Self`.
    fn from_row(row: &Row) -> DbResult<Self>;
}

/// Extension trait for typed column access with mapped errors.
pub trait RowExt {
    /// Get a column value, mapping driver failures to a `Validation` decode
    /// error naming the column.
    fn try_get_column<T>(&self, column: &str) -> DbResult<T>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>;
}

impl RowExt for Row {
    fn try_get_column<T>(&self, column: &str) -> DbResult<T>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        self.try_get(column)
            .map_err(|e| DbError::validation(format!("decode error on column '{column}': {e}")))
    }
}

fn decode_err(column: &str, err: tokio_postgres::Error) -> DbError {
    DbError::validation(format!("decode error on column '{column}': {err}"))
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Decode one column into a JSON value by its wire type.
///
/// UUIDs render as canonical hyphenated lowercase hex; timestamps as RFC 3339
/// strings; bytea as `\x`-prefixed hex. NULL decodes to JSON null.
fn column_to_json(row: &Row, idx: usize) -> DbResult<Value> {
    let column = row.columns().get(idx).expect("column index in range");
    let name = column.name();
    let ty = column.type_();

    let value = if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::Number(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::Number(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::Number(v.into()))
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(Value::Bool)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map_err(|e| decode_err(name, e))?
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map(Value::Number)
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)
            .map_err(|e| decode_err(name, e))?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::String(v.hyphenated().to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::String(v.to_rfc3339()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)
            .map_err(|e| decode_err(name, e))?
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(|v| Value::String(bytes_to_hex(&v)))
    } else {
        row.try_get::<_, Option<String>>(idx)
            .map_err(|e| decode_err(name, e))?
            .map(Value::String)
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Decode a row into a map keyed by server field names.
pub fn row_to_map(row: &Row) -> DbResult<JsonMap> {
    let mut map = JsonMap::new();
    for idx in 0..row.columns().len() {
        let name = row.columns()[idx].name().to_string();
        map.insert(name, column_to_json(row, idx)?);
    }
    Ok(map)
}

/// Decode all rows into maps keyed by server field names.
pub fn rows_to_maps(rows: &[Row]) -> DbResult<Vec<JsonMap>> {
    rows.iter().map(row_to_map).collect()
}
