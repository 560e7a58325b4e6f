//! Domain record carried by subscription messages and its wire schema.
//!
//! The JSON mapping is an explicit table rather than derive-driven: each
//! attribute lists the wire names it accepts (first one is canonical), whether
//! it is required, and what JSON shape it expects. The decoder walks this
//! table; [`DomainMessage::to_json`] walks it in reverse.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A successfully decoded subscription message.
///
/// Only [`crate::decoder::MessageDecoder`] builds these from wire payloads, so
/// a `DomainMessage` always carries a non-blank id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMessage {
    pub id: String,
    pub content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Id,
    Content,
    Timestamp,
    MessageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    DateTime,
}

impl FieldKind {
    pub fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text => "string",
            FieldKind::DateTime => "ISO-8601 date-time string",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub attribute: Attribute,
    /// Accepted names, in precedence order. The first is used when encoding.
    pub wire_names: &'static [&'static str],
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldMapping {
    pub fn canonical_name(&self) -> &'static str {
        self.wire_names[0]
    }
}

pub const MESSAGE_SCHEMA: &[FieldMapping] = &[
    FieldMapping {
        attribute: Attribute::Id,
        wire_names: &["id"],
        kind: FieldKind::Text,
        required: true,
    },
    FieldMapping {
        attribute: Attribute::Content,
        wire_names: &["conteudo", "content"],
        kind: FieldKind::Text,
        required: false,
    },
    FieldMapping {
        attribute: Attribute::Timestamp,
        wire_names: &["timestamp"],
        kind: FieldKind::DateTime,
        required: false,
    },
    FieldMapping {
        attribute: Attribute::MessageType,
        wire_names: &["tipo", "type"],
        kind: FieldKind::Text,
        required: false,
    },
];

impl DomainMessage {
    /// Re-encodes the recognized fields using the canonical wire names.
    /// Absent optional fields are omitted.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();

        for field in MESSAGE_SCHEMA {
            let value = match field.attribute {
                Attribute::Id => Some(Value::String(self.id.clone())),
                Attribute::Content => self.content.clone().map(Value::String),
                Attribute::Timestamp => self
                    .timestamp
                    .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
                Attribute::MessageType => self.message_type.clone().map(Value::String),
            };

            if let Some(value) = value {
                object.insert(field.canonical_name().to_string(), value);
            }
        }

        Value::Object(object)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Short description used in log records.
    pub fn kind(&self) -> &str {
        self.message_type.as_deref().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schema_has_one_required_field() {
        let required: Vec<_> = MESSAGE_SCHEMA
            .iter()
            .filter(|f| f.required)
            .map(|f| f.attribute)
            .collect();
        assert_eq!(required, vec![Attribute::Id]);
    }

    #[test]
    fn test_to_json_uses_canonical_names() {
        let message = DomainMessage {
            id: "m1".to_string(),
            content: Some("hello".to_string()),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
            message_type: Some("greeting".to_string()),
        };

        assert_eq!(
            message.to_json(),
            serde_json::json!({
                "id": "m1",
                "conteudo": "hello",
                "timestamp": "2024-03-01T12:30:00Z",
                "tipo": "greeting",
            })
        );
    }

    #[test]
    fn test_to_json_omits_absent_fields() {
        let message = DomainMessage {
            id: "m2".to_string(),
            content: None,
            timestamp: None,
            message_type: None,
        };

        assert_eq!(message.to_json(), serde_json::json!({ "id": "m2" }));
        assert_eq!(message.kind(), "-");
    }
}
