//! Result normalization
//!
//! Turns a driver [`RowCursor`] into a [`RowResult`]: an ordered list of
//! flat column-name → [`Value`] rows. Rows that fail to scan are left out
//! and logged; raw byte payloads become text.

use crate::driver::{RowCursor, SqlValue};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::sync::Arc;

/// A normalized cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text, including converted byte payloads
    Text(String),
}

impl Value {
    /// Borrow as `&str` if this is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if any
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Int(i) => Value::Int(i),
            SqlValue::Float(f) => Value::Float(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

/// One row: column names shared across the result, values in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Value of column `name` (first match if names repeat)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// `(column, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(k, v)| {
                let json = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
                (k.to_string(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Normalized query output in cursor order
pub type RowResult = Vec<Row>;

/// Drain `cursor` into a [`RowResult`].
///
/// A row that fails to scan is skipped with a warning; the remaining rows
/// are still returned.
pub fn normalize(cursor: &mut dyn RowCursor) -> RowResult {
    let columns: Arc<[String]> = cursor.columns().into();
    let mut rows = Vec::new();
    let mut index = 0usize;

    while let Some(scanned) = cursor.next_row() {
        match scanned {
            Ok(values) if values.len() != columns.len() => {
                tracing::warn!(
                    row = index,
                    expected = columns.len(),
                    actual = values.len(),
                    "skipping row with mismatched column count"
                );
                crate::metrics::counters::row_skipped();
            }
            Ok(values) => rows.push(Row {
                columns: Arc::clone(&columns),
                values: values.into_iter().map(Value::from).collect(),
            }),
            Err(e) => {
                tracing::warn!(row = index, error = %e, "skipping row that failed to scan");
                crate::metrics::counters::row_skipped();
            }
        }
        index += 1;
    }

    rows
}
