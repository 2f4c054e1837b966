//! Type support: encoding of samples for the types a domain carries.
//!
//! Addresses name a type by the id given in the configuration
//! (`topic_types: [{ id: "Shape", type_name: "ShapeType" }]`); the
//! [`TypeRegistry`] maps each id to the implementation for its type name.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fieldgate_driver_framework::{DriverError, Result};

use crate::config::TopicTypeConfig;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid sample: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sample truncated at byte {0}")]
    Truncated(usize),

    #[error("unsupported encapsulation {0:#06x}")]
    Encapsulation(u16),

    #[error("string is not valid UTF-8")]
    Utf8,
}

/// Encoding and decoding of one sample type.
pub trait TypeSupport: Send + Sync + 'static {
    /// Name the type is registered under in a domain.
    fn type_name(&self) -> &str;

    fn encode(&self, sample: &serde_json::Value) -> std::result::Result<Vec<u8>, TypeError>;

    fn decode(&self, data: &[u8]) -> std::result::Result<serde_json::Value, TypeError>;
}

/// Samples carried as UTF-8 JSON text.
#[derive(Debug, Default)]
pub struct JsonTypeSupport;

impl TypeSupport for JsonTypeSupport {
    fn type_name(&self) -> &str {
        "json"
    }

    fn encode(&self, sample: &serde_json::Value) -> std::result::Result<Vec<u8>, TypeError> {
        Ok(serde_json::to_vec(sample)?)
    }

    fn decode(&self, data: &[u8]) -> std::result::Result<serde_json::Value, TypeError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// The shapes demo type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub color: String,
    pub x: i32,
    pub y: i32,
    pub shapesize: i32,
}

/// `ShapeType` in little-endian CDR.
#[derive(Debug, Default)]
pub struct ShapeTypeSupport;

const CDR_LE: u16 = 0x0001;

impl TypeSupport for ShapeTypeSupport {
    fn type_name(&self) -> &str {
        "ShapeType"
    }

    fn encode(&self, sample: &serde_json::Value) -> std::result::Result<Vec<u8>, TypeError> {
        let shape: Shape = serde_json::from_value(sample.clone())?;
        let mut out = CdrWriter::new();
        out.string(&shape.color);
        out.i32(shape.x);
        out.i32(shape.y);
        out.i32(shape.shapesize);
        Ok(out.finish())
    }

    fn decode(&self, data: &[u8]) -> std::result::Result<serde_json::Value, TypeError> {
        let mut input = CdrReader::new(data)?;
        let shape = Shape {
            color: input.string()?,
            x: input.i32()?,
            y: input.i32()?,
            shapesize: input.i32()?,
        };
        Ok(serde_json::to_value(shape)?)
    }
}

/// Writes a CDR stream; alignment is relative to the end of the encapsulation header.
struct CdrWriter {
    header: [u8; 4],
    body: Vec<u8>,
}

impl CdrWriter {
    fn new() -> Self {
        let [hi, lo] = CDR_LE.to_be_bytes();
        Self {
            header: [hi, lo, 0, 0],
            body: Vec::new(),
        }
    }

    fn align(&mut self, n: usize) {
        while self.body.len() % n != 0 {
            self.body.push(0);
        }
    }

    fn u32(&mut self, v: u32) {
        self.align(4);
        self.body.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.align(4);
        self.body.extend_from_slice(&v.to_le_bytes());
    }

    /// Length including the terminating NUL, then the bytes.
    fn string(&mut self, s: &str) {
        self.u32(s.len() as u32 + 1);
        self.body.extend_from_slice(s.as_bytes());
        self.body.push(0);
    }

    fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.body.len());
        out.extend_from_slice(&self.header);
        out.extend(self.body);
        out
    }
}

struct CdrReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> CdrReader<'a> {
    fn new(data: &'a [u8]) -> std::result::Result<Self, TypeError> {
        let header = data.get(..4).ok_or(TypeError::Truncated(data.len()))?;
        let kind = u16::from_be_bytes([header[0], header[1]]);
        if kind != CDR_LE {
            return Err(TypeError::Encapsulation(kind));
        }
        Ok(Self {
            body: &data[4..],
            pos: 0,
        })
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], TypeError> {
        let bytes = self
            .body
            .get(self.pos..self.pos + n)
            .ok_or(TypeError::Truncated(self.pos + 4))?;
        self.pos += n;
        Ok(bytes)
    }

    fn align(&mut self, n: usize) {
        self.pos = self.pos.next_multiple_of(n);
    }

    fn u32(&mut self) -> std::result::Result<u32, TypeError> {
        self.align(4);
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> std::result::Result<i32, TypeError> {
        Ok(self.u32()? as i32)
    }

    fn string(&mut self) -> std::result::Result<String, TypeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        String::from_utf8(text.to_vec()).map_err(|_| TypeError::Utf8)
    }
}

/// The built-in type support for a type name.
pub fn builtin(type_name: &str) -> Option<Arc<dyn TypeSupport>> {
    match type_name {
        "json" => Some(Arc::new(JsonTypeSupport)),
        "ShapeType" => Some(Arc::new(ShapeTypeSupport)),
        _ => None,
    }
}

/// Type supports by type id.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, Arc<dyn TypeSupport>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for the configured type ids.
    pub fn from_config(topic_types: &[TopicTypeConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for topic_type in topic_types {
            let support = builtin(&topic_type.type_name).ok_or_else(|| {
                DriverError::config(format!(
                    "no type support for '{}' (type id '{}')",
                    topic_type.type_name, topic_type.id
                ))
            })?;
            registry.insert(&topic_type.id, support);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, id: impl Into<String>, support: Arc<dyn TypeSupport>) {
        self.types.insert(id.into(), support);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn TypeSupport>> {
        self.types.get(id)
    }

    /// Distinct type names, for registration with a participant.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.values().map(|t| t.type_name().to_string()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_wire_layout() {
        let data = ShapeTypeSupport
            .encode(&json!({"color": "RED", "x": 10, "y": -1, "shapesize": 30}))
            .unwrap();
        assert_eq!(
            data,
            vec![
                0x00, 0x01, 0x00, 0x00, // encapsulation
                4, 0, 0, 0, b'R', b'E', b'D', 0, // color
                10, 0, 0, 0, // x
                0xff, 0xff, 0xff, 0xff, // y
                30, 0, 0, 0, // shapesize
            ]
        );
    }

    #[test]
    fn test_shape_string_padding() {
        let sample = json!({"color": "BLUE", "x": 1, "y": 2, "shapesize": 3});
        let data = ShapeTypeSupport.encode(&sample).unwrap();
        // Header, then length and text padded to 12, then three i32.
        assert_eq!(data.len(), 4 + 12 + 12);
        assert_eq!(ShapeTypeSupport.decode(&data).unwrap(), sample);
    }

    #[test]
    fn test_shape_decode_errors() {
        assert!(matches!(
            ShapeTypeSupport.decode(&[0x00, 0x00, 0x00, 0x00, 1, 0, 0, 0]),
            Err(TypeError::Encapsulation(0))
        ));
        assert!(matches!(
            ShapeTypeSupport.decode(&[0x00, 0x01, 0x00, 0x00, 9, 0, 0, 0, b'R']),
            Err(TypeError::Truncated(_))
        ));
        assert!(ShapeTypeSupport.encode(&json!({"color": "RED"})).is_err());
    }

    #[test]
    fn test_registry_from_config() {
        let registry = TypeRegistry::from_config(&[
            TopicTypeConfig {
                id: "Shape".into(),
                type_name: "ShapeType".into(),
            },
            TopicTypeConfig {
                id: "Square".into(),
                type_name: "ShapeType".into(),
            },
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.type_names(), vec!["ShapeType"]);
        assert_eq!(registry.get("Square").unwrap().type_name(), "ShapeType");

        let err = TypeRegistry::from_config(&[TopicTypeConfig {
            id: "X".into(),
            type_name: "Unknown".into(),
        }]);
        assert!(matches!(err, Err(DriverError::Config(_))));
    }
}
