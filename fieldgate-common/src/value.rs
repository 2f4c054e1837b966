//! Canonical value model shared by all drivers.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A protocol-agnostic scalar or structured value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variant {
    #[default]
    Null,
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Variant>),
    /// Structured value, e.g. a decoded DDS sample.
    Json(serde_json::Value),
    /// Opaque payload, e.g. an encoded DDS sample.
    #[serde(skip_deserializing)]
    Bytes(Vec<u8>),
}

impl Variant {
    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    /// Convert a JSON value into the closest variant.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Variant::Null,
            Value::Bool(b) => Variant::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Variant::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Variant::UInt(u)
                } else {
                    Variant::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Variant::String(s),
            Value::Array(items) => Variant::Array(items.into_iter().map(Variant::from_json).collect()),
            object @ Value::Object(_) => Variant::Json(object),
        }
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Variant::Null => Value::Null,
            Variant::Boolean(b) => Value::Bool(*b),
            Variant::Int(i) => Value::from(*i),
            Variant::UInt(u) => Value::from(*u),
            Variant::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Variant::String(s) => Value::String(s.clone()),
            Variant::Array(items) => Value::Array(items.iter().map(Variant::to_json).collect()),
            Variant::Json(v) => v.clone(),
            Variant::Bytes(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => f.write_str("null"),
            Variant::Boolean(b) => write!(f, "{}", b),
            Variant::Int(i) => write!(f, "{}", i),
            Variant::UInt(u) => write!(f, "{}", u),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::String(s) => f.write_str(s),
            Variant::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Variant::Array(_) | Variant::Json(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<u64> for Variant {
    fn from(v: u64) -> Self {
        Variant::UInt(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

/// OPC-UA style status code. Good when the two severity bits are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_NOT_SUPPORTED: StatusCode = StatusCode(0x803D_0000);
    pub const BAD_OUT_OF_RANGE: StatusCode = StatusCode(0x803C_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_NOT_CONNECTED: StatusCode = StatusCode(0x808A_0000);
    pub const BAD_RESOURCE_UNAVAILABLE: StatusCode = StatusCode(0x8004_0000);

    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Symbolic name for the codes this crate knows about.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            StatusCode::GOOD => "Good",
            StatusCode::UNCERTAIN => "Uncertain",
            StatusCode::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            StatusCode::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_NOT_WRITABLE => "BadNotWritable",
            StatusCode::BAD_NOT_SUPPORTED => "BadNotSupported",
            StatusCode::BAD_OUT_OF_RANGE => "BadOutOfRange",
            StatusCode::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            StatusCode::BAD_NOT_CONNECTED => "BadNotConnected",
            StatusCode::BAD_RESOURCE_UNAVAILABLE => "BadResourceUnavailable",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// A value as delivered by a protocol client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_time: Option<DateTime<Utc>>,
    pub server_time: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value without timestamps.
    pub fn good(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// A value-less result carrying only a status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_source_time(mut self, time: DateTime<Utc>) -> Self {
        self.source_time = Some(time);
        self
    }

    pub fn with_server_time(mut self, time: DateTime<Utc>) -> Self {
        self.server_time = Some(time);
        self
    }
}

/// The value representation published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CanonicalValue {
    pub value: Variant,
    pub status_code: StatusCode,
    pub source_time: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

impl CanonicalValue {
    pub fn is_good(&self) -> bool {
        self.status_code.is_good()
    }
}

/// Current time as Unix epoch milliseconds.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::UNCERTAIN.is_good());
        assert!(StatusCode::UNCERTAIN.is_uncertain());
        assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
        assert!(!StatusCode::BAD_TYPE_MISMATCH.is_good());
        // Good with info bits set is still good.
        assert!(StatusCode(0x0000_0400).is_good());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusCode::GOOD.to_string(), "Good");
        assert_eq!(StatusCode::BAD_TIMEOUT.to_string(), "BadTimeout");
        assert_eq!(StatusCode(0x80AB_0000).to_string(), "0x80AB0000");
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(Variant::from(21.5).to_string(), "21.5");
        assert_eq!(Variant::from(true).to_string(), "true");
        assert_eq!(Variant::from("on").to_string(), "on");
        assert_eq!(Variant::Bytes(vec![0x0a, 0xff]).to_string(), "0aff");
        assert_eq!(
            Variant::Array(vec![Variant::Int(1), Variant::Int(2)]).to_string(),
            "[1,2]"
        );
    }

    #[test]
    fn test_variant_from_json() {
        let v = Variant::from_json(serde_json::json!({"x": 1}));
        assert!(matches!(v, Variant::Json(_)));

        let v = Variant::from_json(serde_json::json!([1, "a", null]));
        assert_eq!(
            v,
            Variant::Array(vec![Variant::Int(1), Variant::from("a"), Variant::Null])
        );

        assert_eq!(Variant::from_json(serde_json::json!(2.5)), Variant::Float(2.5));
    }

    #[test]
    fn test_canonical_value_json_shape() {
        let now = Utc::now();
        let value = CanonicalValue {
            value: Variant::Int(7),
            status_code: StatusCode::GOOD,
            source_time: now,
            server_time: now,
        };
        let json = serde_json::to_value(&value).unwrap();

        assert_eq!(json["Value"], 7);
        assert_eq!(json["StatusCode"], 0);
        assert!(json["SourceTime"].is_string());
        assert!(json["ServerTime"].is_string());
    }
}
