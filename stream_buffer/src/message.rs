use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StreamError;

/// Canonical field keys shared by the Redis and Valkey backends. Both sides
/// of the wire — `Add`'s writer and `ReadGroup`'s reader — must agree on
/// exactly this set, or messages silently lose fields across a backend swap.
pub const FIELD_ORIGIN: &str = "origin";
pub const FIELD_SCHEMA_URI: &str = "schemaURI";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_DATA: &str = "data";

/// The unit of work flowing from the partitioned consumer through the
/// stream buffer into the sink writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub origin: String,
    pub schema_uri: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Message {
    pub fn new(origin: impl Into<String>, schema_uri: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            schema_uri: schema_uri.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Encode as the flat `field -> string` pairs `XADD` expects.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_ORIGIN.to_string(), self.origin.clone()),
            (FIELD_SCHEMA_URI.to_string(), self.schema_uri.clone()),
            (FIELD_TIMESTAMP.to_string(), self.timestamp.to_rfc3339()),
            (FIELD_DATA.to_string(), self.data.to_string()),
        ]
    }

    /// Decode from the field map a stream read returns. Any missing or
    /// malformed field fails closed rather than substituting a default —
    /// a partially-written entry is a bug somewhere upstream, not a value
    /// to paper over.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StreamError> {
        let origin = fields
            .get(FIELD_ORIGIN)
            .ok_or_else(|| StreamError::MalformedMessage(FIELD_ORIGIN.to_string()))?
            .clone();
        let schema_uri = fields
            .get(FIELD_SCHEMA_URI)
            .ok_or_else(|| StreamError::MalformedMessage(FIELD_SCHEMA_URI.to_string()))?
            .clone();
        let timestamp_raw = fields
            .get(FIELD_TIMESTAMP)
            .ok_or_else(|| StreamError::MalformedMessage(FIELD_TIMESTAMP.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp_raw)
            .map_err(|_| StreamError::MalformedMessage(FIELD_TIMESTAMP.to_string()))?
            .with_timezone(&Utc);
        let data_raw = fields
            .get(FIELD_DATA)
            .ok_or_else(|| StreamError::MalformedMessage(FIELD_DATA.to_string()))?;
        let data: Value = serde_json::from_str(data_raw)
            .map_err(|_| StreamError::MalformedMessage(FIELD_DATA.to_string()))?;

        Ok(Self {
            origin,
            schema_uri,
            timestamp,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_field_encoding() {
        let msg = Message::new("kafka://orders/0", "https://schemas/order.v1", json!({"a": 1}));
        let fields: HashMap<String, String> = msg.to_fields().into_iter().collect();
        let decoded = Message::from_fields(&fields).unwrap();
        assert_eq!(decoded.origin, msg.origin);
        assert_eq!(decoded.schema_uri, msg.schema_uri);
        assert_eq!(decoded.data, msg.data);
    }

    #[test]
    fn missing_field_is_malformed_message() {
        let mut fields = HashMap::new();
        fields.insert(FIELD_ORIGIN.to_string(), "x".to_string());
        let err = Message::from_fields(&fields).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage(_)));
    }
}
