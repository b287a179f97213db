//! Event-to-row mapping.
//!
//! A monitoring event arrives as a JSON object with a fixed field set:
//! `request_timestamp`, `url`, `service_name`, `resp_time`,
//! `resp_status_code`, `ip_address`, `pattern_found`, `comment`. Mapping
//! renames each field to its destination column and stringifies the value,
//! keeping JSON `null` as an explicit null marker distinct from the empty
//! string. A missing field fails the whole event — the caller aborts the
//! batch's insert rather than persisting a partial row.

use serde_json::Value;

use crate::error::{ConnectorError, Result};

/// Source event field → destination column, in destination schema order.
pub const EVENT_FIELD_COLUMNS: [(&str, &str); 8] = [
    ("request_timestamp", "time_stamp"),
    ("url", "url"),
    ("service_name", "agent"),
    ("resp_time", "response_time"),
    ("resp_status_code", "status_code"),
    ("ip_address", "ip"),
    ("pattern_found", "content_validation"),
    ("comment", "comment"),
];

/// A mapped cell value: stringified content or an explicit SQL null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Null,
}

impl FieldValue {
    /// The value to bind for this cell, `None` binding as SQL NULL.
    pub fn as_bind(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Null => None,
        }
    }
}

/// One event mapped to destination columns, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    columns: Vec<(&'static str, FieldValue)>,
}

impl MappedRow {
    /// Column names in order.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|(name, _)| *name).collect()
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Look up a single cell by column name.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_columns(columns: Vec<(&'static str, FieldValue)>) -> Self {
        Self { columns }
    }
}

/// Map one decoded event into a [`MappedRow`].
///
/// Pure transform: no side effects, the event is not consumed.
///
/// # Errors
///
/// `MappingError` when the event is not a JSON object or any required
/// field is absent. No partial row is produced.
pub fn map_event(event: &Value) -> Result<MappedRow> {
    let object = event.as_object().ok_or_else(|| {
        ConnectorError::MappingError(format!(
            "event must be a JSON object, got: {}",
            json_kind(event)
        ))
    })?;

    let mut columns = Vec::with_capacity(EVENT_FIELD_COLUMNS.len());
    for (field, column) in EVENT_FIELD_COLUMNS {
        let value = object.get(field).ok_or_else(|| {
            ConnectorError::MappingError(format!("event is missing required field '{}'", field))
        })?;
        columns.push((column, stringify(value)));
    }

    Ok(MappedRow { columns })
}

/// Stringify a JSON scalar for binding. Strings keep their content as-is
/// (no added quoting); null becomes the null marker.
fn stringify(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Bool(b) => FieldValue::Text(b.to_string()),
        Value::Number(n) => FieldValue::Text(n.to_string()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
