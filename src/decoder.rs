use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DecodeFailure;
use crate::message::{Attribute, DomainMessage, FieldKind, FieldMapping, MESSAGE_SCHEMA};

/// Turns raw subscription payloads into [`DomainMessage`]s.
///
/// Decoding never panics and never hands out a partially filled message:
/// every problem with the payload comes back as a [`DecodeFailure`].
#[derive(Debug, Clone, Copy)]
pub struct MessageDecoder {
    schema: &'static [FieldMapping],
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self {
            schema: MESSAGE_SCHEMA,
        }
    }
}

/// Values collected while walking the schema. Private so that it can never
/// leave the decoder half-filled.
#[derive(Default)]
struct Fields {
    id: Option<String>,
    content: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    message_type: Option<String>,
}

enum FieldValue {
    Text(String),
    DateTime(DateTime<Utc>),
}

impl MessageDecoder {
    pub fn decode(&self, payload: &[u8]) -> Result<DomainMessage, DecodeFailure> {
        let text =
            std::str::from_utf8(payload).map_err(|e| DecodeFailure::InvalidUtf8(e.to_string()))?;

        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeFailure::MalformedJson(e.to_string()))?;

        let Value::Object(object) = value else {
            return Err(DecodeFailure::NotAnObject);
        };

        let mut fields = Fields::default();

        for mapping in self.schema {
            let Some((wire_name, raw)) = lookup(&object, mapping) else {
                if mapping.required {
                    return Err(DecodeFailure::MissingField(mapping.canonical_name()));
                }
                continue;
            };

            match (mapping.attribute, convert(wire_name, raw, mapping.kind)?) {
                (Attribute::Id, FieldValue::Text(id)) => fields.id = Some(id),
                (Attribute::Content, FieldValue::Text(content)) => fields.content = Some(content),
                (Attribute::Timestamp, FieldValue::DateTime(ts)) => fields.timestamp = Some(ts),
                (Attribute::MessageType, FieldValue::Text(t)) => fields.message_type = Some(t),
                _ => {
                    return Err(DecodeFailure::WrongType {
                        field: wire_name,
                        expected: mapping.kind.expected(),
                    });
                }
            }
        }

        let id = fields.id.ok_or(DecodeFailure::MissingField("id"))?;
        if id.trim().is_empty() {
            return Err(DecodeFailure::BlankField("id"));
        }

        Ok(DomainMessage {
            id,
            content: fields.content,
            timestamp: fields.timestamp,
            message_type: fields.message_type,
        })
    }
}

/// First non-null value among the mapping's accepted names.
fn lookup<'a>(
    object: &'a Map<String, Value>,
    mapping: &FieldMapping,
) -> Option<(&'static str, &'a Value)> {
    mapping.wire_names.iter().find_map(|name| match object.get(*name) {
        None | Some(Value::Null) => None,
        Some(value) => Some((*name, value)),
    })
}

fn convert(field: &'static str, raw: &Value, kind: FieldKind) -> Result<FieldValue, DecodeFailure> {
    let Value::String(s) = raw else {
        return Err(DecodeFailure::WrongType {
            field,
            expected: kind.expected(),
        });
    };

    match kind {
        FieldKind::Text => Ok(FieldValue::Text(s.clone())),
        FieldKind::DateTime => parse_timestamp(s)
            .map(FieldValue::DateTime)
            .ok_or_else(|| DecodeFailure::InvalidTimestamp {
                field,
                value: s.clone(),
            }),
    }
}

/// Offset-less ISO-8601 local date-time layouts; seconds are optional.
const LOCAL_DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Accepts RFC 3339 (normalised to UTC) and offset-less ISO-8601 local
/// date-times, which are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    LOCAL_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decode(payload: &str) -> Result<DomainMessage, DecodeFailure> {
        MessageDecoder::default().decode(payload.as_bytes())
    }

    #[test]
    fn test_decode_portuguese_field_names() {
        let message = decode(r#"{"id":"m1","conteudo":"hello","tipo":"greeting"}"#).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert_eq!(message.message_type.as_deref(), Some("greeting"));
        assert_eq!(message.timestamp, None);
    }

    #[test]
    fn test_decode_english_field_names() {
        let message = decode(r#"{"id":"m1","content":"hello","type":"greeting"}"#).unwrap();
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert_eq!(message.message_type.as_deref(), Some("greeting"));
    }

    #[test]
    fn test_first_alias_wins() {
        let message = decode(r#"{"id":"m1","content":"en","conteudo":"pt"}"#).unwrap();
        assert_eq!(message.content.as_deref(), Some("pt"));
    }

    #[test]
    fn test_null_alias_falls_through() {
        let message = decode(r#"{"id":"m1","conteudo":null,"content":"en"}"#).unwrap();
        assert_eq!(message.content.as_deref(), Some("en"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let message = decode(r#"{"id":"m1","priority":3,"nested":{"a":1}}"#).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.content, None);
    }

    #[test]
    fn test_rfc3339_timestamp_normalised_to_utc() {
        let message = decode(r#"{"id":"m1","timestamp":"2024-03-01T14:30:00+02:00"}"#).unwrap();
        assert_eq!(
            message.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_local_timestamp_taken_as_utc() {
        let message = decode(r#"{"id":"m1","timestamp":"2024-03-01T12:30:00.250"}"#).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(message.timestamp, Some(expected));
    }

    #[test]
    fn test_local_timestamp_without_seconds() {
        let message = decode(r#"{"id":"m1","timestamp":"2024-03-01T12:30"}"#).unwrap();
        assert_eq!(
            message.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(
            decode("not-json"),
            Err(DecodeFailure::MalformedJson(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let result = MessageDecoder::default().decode(&[0x7b, 0xff, 0xfe, 0x7d]);
        assert!(matches!(result, Err(DecodeFailure::InvalidUtf8(_))));
    }

    #[test]
    fn test_json_array_is_not_an_object() {
        assert_eq!(decode(r#"[{"id":"m1"}]"#), Err(DecodeFailure::NotAnObject));
    }

    #[test]
    fn test_missing_id() {
        assert_eq!(
            decode(r#"{"conteudo":"hello"}"#),
            Err(DecodeFailure::MissingField("id"))
        );
        assert_eq!(
            decode(r#"{"id":null}"#),
            Err(DecodeFailure::MissingField("id"))
        );
    }

    #[test]
    fn test_blank_id() {
        assert_eq!(
            decode(r#"{"id":"  "}"#),
            Err(DecodeFailure::BlankField("id"))
        );
    }

    #[test]
    fn test_wrong_field_type() {
        assert_eq!(
            decode(r#"{"id":42}"#),
            Err(DecodeFailure::WrongType {
                field: "id",
                expected: "string"
            })
        );
        assert_eq!(
            decode(r#"{"id":"m1","tipo":["a"]}"#),
            Err(DecodeFailure::WrongType {
                field: "tipo",
                expected: "string"
            })
        );
    }

    #[test]
    fn test_invalid_timestamp() {
        assert_eq!(
            decode(r#"{"id":"m1","timestamp":"yesterday"}"#),
            Err(DecodeFailure::InvalidTimestamp {
                field: "timestamp",
                value: "yesterday".to_string()
            })
        );
    }

    #[test]
    fn test_reencode_is_idempotent() {
        let payloads = [
            r#"{"id":"m1","conteudo":"hello","tipo":"greeting"}"#,
            r#"{"id":"m2","content":"olá","type":"t","timestamp":"2024-03-01T12:30:00"}"#,
            r#"{"id":"m3","timestamp":"2024-03-01T12:30:00.123456789-05:00","extra":true}"#,
            r#"{"id":"m4"}"#,
        ];

        let decoder = MessageDecoder::default();
        for payload in payloads {
            let first = decoder.decode(payload.as_bytes()).unwrap();
            let second = decoder.decode(&first.to_bytes()).unwrap();
            assert_eq!(first, second, "round trip changed {payload}");
        }
    }
}
