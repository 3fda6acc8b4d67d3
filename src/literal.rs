//! The one place where identifiers and values become SQL text.
//!
//! Everything that builds a statement by string formatting goes through
//! [`quote_ident`] for names and [`sql_literal`] for values; captured DDL is
//! passed through verbatim and never interpolated.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::value::{SqlValue, TIMESTAMP_FORMAT};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) if v.is_finite() => v.to_string(),
        SqlValue::Real(_) => "NULL".to_string(),
        SqlValue::Bool(true) => "1".to_string(),
        SqlValue::Bool(false) => "0".to_string(),
        SqlValue::Text(v) => quote_str(v),
        SqlValue::Timestamp(v) => quote_str(&v.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::Blob(bytes) => quote_str(&STANDARD.encode(bytes)),
        SqlValue::Json(v) => quote_str(&v.to_string()),
    }
}

/// Comma-separated, quoted column list.
pub fn ident_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}
