//! Typed cell values and ordered rows passed between the fetcher, the label
//! resolver and the serializers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDateTime;
use serde_json::{Map, Number, Value};

/// Canonical rendering for timestamps in every output format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Blob(Vec<u8>),
    Json(Value),
}

/// What a column's declared type says about how to read and write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    Bool,
    Timestamp,
    Json,
    Blob,
    Other,
}

impl TypeHint {
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BOOL") {
            TypeHint::Bool
        } else if upper.contains("DATE") || upper.contains("TIME") {
            TypeHint::Timestamp
        } else if upper.contains("JSON") {
            TypeHint::Json
        } else if upper.contains("BLOB") || upper.contains("BINARY") {
            TypeHint::Blob
        } else {
            TypeHint::Other
        }
    }
}

/// Parses stored text as a timestamp only when it is already in canonical
/// form. Anything else (`T` separators, fractional seconds, offsets) stays
/// text so that re-rendering gives back exactly what was stored.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let ts = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()?;
    (ts.format(TIMESTAMP_FORMAT).to_string() == raw).then_some(ts)
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SqlValue::Integer(_) | SqlValue::Real(_))
    }

    /// Plain text rendering used by the CSV and spreadsheet writers.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Timestamp(v) => v.format(TIMESTAMP_FORMAT).to_string(),
            SqlValue::Blob(bytes) => STANDARD.encode(bytes),
            SqlValue::Json(v) => v.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(v) => Value::from(*v),
            SqlValue::Real(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::Json(v) => v.clone(),
            other => Value::String(other.render()),
        }
    }

    /// Key used to match foreign-key values against referenced ids, so that
    /// `7`, `7.0` and `"7"` all resolve to the same row.
    pub fn lookup_key(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Real(v) if v.fract() == 0.0 && v.is_finite() => Some((*v as i64).to_string()),
            SqlValue::Text(v) => Some(v.trim().to_string()),
            other => Some(other.render()),
        }
    }
}

/// An ordered column → value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
        }
    }

    /// Appends a cell, replacing any existing value under the same column.
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    /// A copy of this row with one extra (or replaced) column.
    pub fn with_column(&self, column: impl Into<String>, value: SqlValue) -> Row {
        let mut copy = self.clone();
        copy.push(column, value);
        copy
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.push(column, value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_map_to_hints() {
        assert_eq!(TypeHint::from_declared("BOOLEAN"), TypeHint::Bool);
        assert_eq!(TypeHint::from_declared("datetime"), TypeHint::Timestamp);
        assert_eq!(TypeHint::from_declared("TIMESTAMP"), TypeHint::Timestamp);
        assert_eq!(TypeHint::from_declared("JSON"), TypeHint::Json);
        assert_eq!(TypeHint::from_declared("BLOB"), TypeHint::Blob);
        assert_eq!(TypeHint::from_declared("INTEGER"), TypeHint::Other);
        assert_eq!(TypeHint::from_declared(""), TypeHint::Other);
    }

    #[test]
    fn only_canonical_text_parses_as_timestamp() {
        let expected = parse_timestamp("2024-03-01 08:30:00").expect("canonical");
        assert!(parse_timestamp("2024-03-01T08:30:00").is_none());
        assert!(parse_timestamp("2024-03-01 08:30:00.250").is_none());
        assert!(parse_timestamp(" 2024-03-01 08:30:00").is_none());
        assert!(parse_timestamp("2024-03-01").is_none());
        assert_eq!(
            SqlValue::Timestamp(expected).render(),
            "2024-03-01 08:30:00"
        );
    }

    #[test]
    fn lookup_keys_normalize_numeric_ids() {
        assert_eq!(SqlValue::Integer(7).lookup_key().as_deref(), Some("7"));
        assert_eq!(SqlValue::Real(7.0).lookup_key().as_deref(), Some("7"));
        assert_eq!(SqlValue::Text(" 7 ".into()).lookup_key().as_deref(), Some("7"));
        assert_eq!(SqlValue::Null.lookup_key(), None);
    }

    #[test]
    fn push_replaces_existing_column_in_place() {
        let mut row = Row::new();
        row.push("id_proyecto", SqlValue::Integer(1));
        row.push("nombre", SqlValue::Text("Flex Park".into()));
        row.push("id_proyecto", SqlValue::Integer(2));

        assert_eq!(row.len(), 2);
        assert_eq!(row.columns().collect::<Vec<_>>(), ["id_proyecto", "nombre"]);
        assert_eq!(row.get("id_proyecto"), Some(&SqlValue::Integer(2)));
    }

    #[test]
    fn json_rendering_keeps_types() {
        assert_eq!(SqlValue::Bool(true).to_json(), Value::Bool(true));
        assert_eq!(SqlValue::Blob(vec![1, 2, 3]).to_json(), Value::String("AQID".into()));
        assert_eq!(SqlValue::Real(f64::NAN).to_json(), Value::Null);
    }
}
