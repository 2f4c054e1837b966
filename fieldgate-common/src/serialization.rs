use serde::Serialize;

use crate::error::Result;
use crate::topic::{OutputFormat, Topic};
use crate::value::{CanonicalValue, Variant};

/// `{Topic, Value}` envelope used by the JSON output formats.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "Topic")]
    pub topic: &'a Topic,
    #[serde(rename = "Value")]
    pub value: &'a CanonicalValue,
}

/// Encode a value for the bus according to the topic's output format.
///
/// Returns `None` for raw topics whose value is null, which are not published.
pub fn encode_value(topic: &Topic, value: &CanonicalValue) -> Result<Option<Vec<u8>>> {
    let bytes = match topic.format {
        OutputFormat::Raw => {
            if value.value.is_null() {
                return Ok(None);
            }
            value.value.to_string().into_bytes()
        }
        OutputFormat::Json => serde_json::to_vec(&Envelope { topic, value })?,
        OutputFormat::PrettyJson => serde_json::to_vec_pretty(&Envelope { topic, value })?,
    };
    Ok(Some(bytes))
}

/// JSON form of a topic, as embedded in envelopes.
pub fn topic_json(topic: &Topic) -> serde_json::Value {
    serde_json::to_value(topic).unwrap_or(serde_json::Value::Null)
}

/// JSON form of a value, as embedded in envelopes and read replies.
pub fn value_json(value: &CanonicalValue) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Interpret an inbound payload: JSON when it parses, a plain string otherwise.
pub fn decode_payload(payload: &[u8]) -> Variant {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(json) => Variant::from_json(json),
        Err(_) => Variant::String(String::from_utf8_lossy(payload).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StatusCode;
    use chrono::Utc;

    fn value(v: Variant) -> CanonicalValue {
        let now = Utc::now();
        CanonicalValue {
            value: v,
            status_code: StatusCode::GOOD,
            source_time: now,
            server_time: now,
        }
    }

    #[test]
    fn test_raw_is_bare_string() {
        let topic = Topic::parse("opc/s/node/i=1").unwrap();
        let encoded = encode_value(&topic, &value(Variant::Float(3.5))).unwrap();
        assert_eq!(encoded.as_deref(), Some(&b"3.5"[..]));
    }

    #[test]
    fn test_raw_null_is_skipped() {
        let topic = Topic::parse("opc/s/node/i=1").unwrap();
        assert!(encode_value(&topic, &value(Variant::Null)).unwrap().is_none());
    }

    #[test]
    fn test_json_envelope() {
        let topic = Topic::parse("plc/press/node:json/coil:3").unwrap();
        let encoded = encode_value(&topic, &value(Variant::Boolean(true)))
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(json["Topic"]["SystemType"], "Plc");
        assert_eq!(json["Topic"]["Address"], "coil:3");
        assert_eq!(json["Topic"]["TopicName"], "plc/press/node:json/coil:3");
        assert_eq!(json["Value"]["Value"], true);
        assert!(!encoded.contains(&b'\n'));
    }

    #[test]
    fn test_pretty_envelope_is_indented() {
        let topic = Topic::parse("plc/press/node:pretty/coil:3").unwrap();
        let encoded = encode_value(&topic, &value(Variant::Int(1))).unwrap().unwrap();
        assert!(encoded.contains(&b'\n'));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload(b"42"), Variant::Int(42));
        assert_eq!(decode_payload(b"\"x\""), Variant::from("x"));
        assert_eq!(decode_payload(b"hello"), Variant::from("hello"));
    }
}
