//! Inbound webhook decoding.
//!
//! Accepts the WhatsApp Cloud envelope, Twilio field names (form or JSON) and
//! a flat generic shape, and yields one provider-neutral [`InboundMessage`].

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::conversation::types::{InboundMessage, MessageKind};
use crate::error::DomainError;

/// Decodes a provider payload. `received_at` stands in when the payload has no timestamp.
pub fn decode_inbound(payload: &Value, received_at: DateTime<Utc>) -> Result<InboundMessage, DomainError> {
    if payload.get("entry").is_some() {
        return decode_whatsapp(payload, received_at);
    }
    if payload.get("MessageSid").is_some() || payload.get("SmsMessageSid").is_some() {
        return decode_twilio(payload, received_at);
    }
    decode_generic(payload, received_at)
}

fn decode_whatsapp(payload: &Value, received_at: DateTime<Utc>) -> Result<InboundMessage, DomainError> {
    let value = payload
        .pointer("/entry/0/changes/0/value")
        .ok_or_else(|| invalid("entry", "missing change value"))?;
    let message = value
        .pointer("/messages/0")
        .ok_or_else(|| invalid("messages", "payload carries no message"))?;

    let kind_text = str_field(message, "type").unwrap_or("text");
    let (kind, content) = match kind_text {
        "text" => (
            MessageKind::Text,
            message
                .pointer("/text/body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        "template" => (MessageKind::Template, String::new()),
        other => (
            MessageKind::Media,
            message
                .pointer(&format!("/{other}/caption"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
    };

    let to = value
        .pointer("/metadata/display_phone_number")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(InboundMessage {
        external_message_id: required(message, "id")?.to_string(),
        from: strip_channel_prefix(required(message, "from")?),
        to: strip_channel_prefix(to),
        content,
        kind,
        timestamp: message
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or(received_at),
    })
}

fn decode_twilio(payload: &Value, received_at: DateTime<Utc>) -> Result<InboundMessage, DomainError> {
    let sid = str_field(payload, "MessageSid")
        .or_else(|| str_field(payload, "SmsMessageSid"))
        .ok_or_else(|| invalid("MessageSid", "is required"))?;
    let media_count = str_field(payload, "NumMedia")
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(0);

    Ok(InboundMessage {
        external_message_id: sid.to_string(),
        from: strip_channel_prefix(required(payload, "From")?),
        to: strip_channel_prefix(str_field(payload, "To").unwrap_or_default()),
        content: str_field(payload, "Body").unwrap_or_default().to_string(),
        kind: if media_count > 0 {
            MessageKind::Media
        } else {
            MessageKind::Text
        },
        timestamp: received_at,
    })
}

fn decode_generic(payload: &Value, received_at: DateTime<Utc>) -> Result<InboundMessage, DomainError> {
    let id = ["external_message_id", "messageId", "message_id", "id"]
        .iter()
        .find_map(|k| str_field(payload, k))
        .ok_or_else(|| invalid("external_message_id", "is required"))?;
    let content = ["content", "text", "body"]
        .iter()
        .find_map(|k| str_field(payload, k))
        .unwrap_or_default();
    let kind = str_field(payload, "type")
        .and_then(MessageKind::parse)
        .unwrap_or(MessageKind::Text);

    Ok(InboundMessage {
        external_message_id: id.to_string(),
        from: strip_channel_prefix(required(payload, "from")?),
        to: strip_channel_prefix(str_field(payload, "to").unwrap_or_default()),
        content: content.to_string(),
        kind,
        timestamp: payload
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or(received_at),
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn required<'a>(value: &'a Value, key: &'static str) -> Result<&'a str, DomainError> {
    str_field(value, key).ok_or_else(|| invalid(key, "is required"))
}

fn invalid(field: &'static str, message: &str) -> DomainError {
    DomainError::validation(field, message.to_string())
}

/// Drops channel prefixes such as `whatsapp:` and `sms:`.
fn strip_channel_prefix(address: &str) -> String {
    address
        .rsplit_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(address)
        .trim()
        .to_string()
}

/// Accepts RFC 3339 strings and unix seconds given as number or string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            s.parse::<i64>().ok()
        }
        _ => None,
    }?;
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_whatsapp_cloud_envelope() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "display_phone_number": "15550001111" },
                        "messages": [{
                            "from": "15550102030",
                            "id": "wamid.ABC",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": "Is my order shipped?" }
                        }]
                    }
                }]
            }]
        });

        let decoded = decode_inbound(&payload, Utc::now()).unwrap();
        assert_eq!(decoded.external_message_id, "wamid.ABC");
        assert_eq!(decoded.from, "15550102030");
        assert_eq!(decoded.to, "15550001111");
        assert_eq!(decoded.content, "Is my order shipped?");
        assert_eq!(decoded.kind, MessageKind::Text);
        assert_eq!(decoded.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn decodes_twilio_fields() {
        let now = Utc::now();
        let payload = json!({
            "MessageSid": "SM123",
            "From": "whatsapp:+15550102030",
            "To": "whatsapp:+15550001111",
            "Body": "STOP",
            "NumMedia": "0"
        });

        let decoded = decode_inbound(&payload, now).unwrap();
        assert_eq!(decoded.external_message_id, "SM123");
        assert_eq!(decoded.from, "+15550102030");
        assert_eq!(decoded.content, "STOP");
        assert_eq!(decoded.timestamp, now);
    }

    #[test]
    fn decodes_generic_shape() {
        let payload = json!({
            "id": "ext-1",
            "from": "+15550102030",
            "to": "outpost",
            "text": "hello",
            "type": "media",
            "timestamp": "2025-03-01T10:00:00Z"
        });

        let decoded = decode_inbound(&payload, Utc::now()).unwrap();
        assert_eq!(decoded.kind, MessageKind::Media);
        assert_eq!(decoded.content, "hello");
        assert_eq!(decoded.timestamp.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }

    #[test]
    fn rejects_payload_without_sender() {
        let err = decode_inbound(&json!({ "id": "x", "text": "hi" }), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: "from", .. }));

        let empty = json!({ "entry": [{ "changes": [{ "value": { "statuses": [] } }] }] });
        assert!(decode_inbound(&empty, Utc::now()).is_err());
    }
}
