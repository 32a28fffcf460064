use crate::error::{HubError, Result};
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Sortable receive time. Internal: only the ingestion acknowledgement shows it.
pub const DATETIME_FIELD: &str = "datetime";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(&Local::now())
}

/// A sensor payload stamped on arrival. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
    timestamp: String,
    received_at: DateTime<Local>,
}

impl Record {
    /// Stamps a payload. Client-supplied `timestamp`/`datetime` fields are
    /// replaced by the server's.
    pub fn stamp(mut fields: Map<String, Value>, received_at: DateTime<Local>) -> Self {
        fields.shift_remove(TIMESTAMP_FIELD);
        fields.shift_remove(DATETIME_FIELD);
        Self {
            fields,
            timestamp: format_timestamp(&received_at),
            received_at,
        }
    }

    /// Validates a decoded payload: it must be a non-empty JSON object.
    pub fn from_value(value: Value, received_at: DateTime<Local>) -> Result<Self> {
        match value {
            Value::Null => Err(HubError::validation("No data received")),
            Value::Object(map) if map.is_empty() => Err(HubError::validation("No data received")),
            Value::Object(map) => Ok(Self::stamp(map, received_at)),
            other => Err(HubError::validation(format!(
                "Expected a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Decodes a raw request body.
    pub fn parse(body: &[u8], received_at: DateTime<Local>) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(HubError::validation("No data received"));
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| HubError::validation(format!("Invalid JSON: {}", e)))?;
        Self::from_value(value, received_at)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// Client fields plus `timestamp`.
    pub fn public_view(&self) -> Map<String, Value> {
        let mut view = self.fields.clone();
        view.insert(TIMESTAMP_FIELD.to_string(), Value::String(self.timestamp.clone()));
        view
    }

    /// Client fields plus both server-assigned fields.
    pub fn stored_view(&self) -> Map<String, Value> {
        let mut view = self.public_view();
        view.insert(
            DATETIME_FIELD.to_string(),
            Value::String(self.received_at.to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        view
    }

    /// Numeric client fields, in payload order.
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.as_str(), n)))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.public_view().serialize(serializer)
    }
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
