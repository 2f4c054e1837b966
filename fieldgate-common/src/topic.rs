//! Topic/address model.
//!
//! A topic names one subscription or publish target. Its text form is
//!
//! ```text
//! <system>/<name>/<node|path>[:<value|json|pretty>]/<address>
//! ```
//!
//! where the address may itself contain `/` (paths always do).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("empty topic")]
    Empty,

    #[error("unknown system type '{0}'")]
    UnknownSystem(String),

    #[error("unknown topic type '{0}'")]
    UnknownTopicType(String),

    #[error("unknown output format '{0}'")]
    UnknownFormat(String),

    #[error("topic '{0}' has no address")]
    MissingAddress(String),

    #[error("topic '{0}' has no system name")]
    MissingSystemName(String),
}

/// Which protocol driver owns a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemType {
    #[serde(rename = "Opc")]
    OpcUa,
    Plc,
    Dds,
}

impl SystemType {
    /// Lowercase name used in topics and key expressions.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::OpcUa => "opc",
            SystemType::Plc => "plc",
            SystemType::Dds => "dds",
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opc" | "opcua" => Ok(SystemType::OpcUa),
            "plc" => Ok(SystemType::Plc),
            "dds" => Ok(SystemType::Dds),
            _ => Err(TopicError::UnknownSystem(s.to_string())),
        }
    }
}

/// Whether the address is concrete or a browse path needing resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicType {
    NodeId,
    Path,
}

impl TopicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::NodeId => "node",
            TopicType::Path => "path",
        }
    }
}

impl FromStr for TopicType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" | "nodeid" => Ok(TopicType::NodeId),
            "path" => Ok(TopicType::Path),
            _ => Err(TopicError::UnknownTopicType(s.to_string())),
        }
    }
}

/// Wire representation pushed to the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Bare value as a string.
    #[default]
    Raw,
    /// Compact `{Topic, Value}` envelope.
    Json,
    /// Indented `{Topic, Value}` envelope.
    PrettyJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Raw => "value",
            OutputFormat::Json => "json",
            OutputFormat::PrettyJson => "pretty",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "value" | "raw" => Ok(OutputFormat::Raw),
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::PrettyJson),
            _ => Err(TopicError::UnknownFormat(s.to_string())),
        }
    }
}

/// A concrete address produced by browsing a symbolic path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResolvedAddress {
    pub address: String,
    pub browse_path: String,
}

impl ResolvedAddress {
    pub fn new(address: impl Into<String>, browse_path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            browse_path: browse_path.into(),
        }
    }
}

/// A named, typed subscription/publish target.
///
/// Equality and hashing only consider `(system_type, address, topic_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Topic {
    pub system_type: SystemType,
    pub system_name: String,
    pub topic_type: TopicType,
    pub address: String,
    pub topic_name: String,
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_path: Option<String>,
    /// The symbolic path this concrete topic was resolved from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl Topic {
    /// Parse the text form of a topic. The channel name is the text itself.
    pub fn parse(text: &str) -> Result<Self, TopicError> {
        let text = text.trim().trim_matches('/');
        if text.is_empty() {
            return Err(TopicError::Empty);
        }

        let mut parts = text.splitn(4, '/');
        let system_type: SystemType = parts.next().unwrap_or_default().parse()?;
        let system_name = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TopicError::MissingSystemName(text.to_string()))?;
        let kind = parts
            .next()
            .ok_or_else(|| TopicError::MissingAddress(text.to_string()))?;
        let address = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TopicError::MissingAddress(text.to_string()))?;

        let (topic_type, format) = match kind.split_once(':') {
            Some((kind, format)) => (kind.parse()?, format.parse()?),
            None => (kind.parse()?, OutputFormat::default()),
        };

        Ok(Self {
            system_type,
            system_name: system_name.to_string(),
            topic_type,
            address: address.to_string(),
            topic_name: text.to_string(),
            format,
            browse_path: None,
            source_path: None,
        })
    }

    /// Build a concrete topic for a native address.
    pub fn node(
        system_type: SystemType,
        system_name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        let mut topic = Self {
            system_type,
            system_name: system_name.into(),
            topic_type: TopicType::NodeId,
            address: address.into(),
            topic_name: String::new(),
            format: OutputFormat::default(),
            browse_path: None,
            source_path: None,
        };
        topic.topic_name = topic.to_string();
        topic
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_topic_name(mut self, topic_name: impl Into<String>) -> Self {
        self.topic_name = topic_name.into();
        self
    }

    pub fn is_path(&self) -> bool {
        self.topic_type == TopicType::Path
    }

    /// Derive the concrete topic for one resolution result of this path topic.
    ///
    /// The channel name is kept so consumers of the path keep receiving values.
    pub fn resolved(&self, resolved: &ResolvedAddress) -> Topic {
        Topic {
            system_type: self.system_type,
            system_name: self.system_name.clone(),
            topic_type: TopicType::NodeId,
            address: resolved.address.clone(),
            topic_name: self.topic_name.clone(),
            format: self.format,
            browse_path: Some(resolved.browse_path.clone()),
            source_path: Some(self.address.clone()),
        }
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.system_type == other.system_type
            && self.address == other.address
            && self.topic_name == other.topic_name
    }
}

impl Eq for Topic {}

impl Hash for Topic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system_type.hash(state);
        self.address.hash(state);
        self.topic_name.hash(state);
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.system_type,
            self.system_name,
            self.topic_type.as_str()
        )?;
        if self.format != OutputFormat::Raw {
            write!(f, ":{}", self.format.as_str())?;
        }
        write!(f, "/{}", self.address)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_node_topic() {
        let topic = Topic::parse("opc/plant1/node:json/ns=2;s=Line1/Temp").unwrap();

        assert_eq!(topic.system_type, SystemType::OpcUa);
        assert_eq!(topic.system_name, "plant1");
        assert_eq!(topic.topic_type, TopicType::NodeId);
        assert_eq!(topic.format, OutputFormat::Json);
        assert_eq!(topic.address, "ns=2;s=Line1/Temp");
        assert_eq!(topic.topic_name, "opc/plant1/node:json/ns=2;s=Line1/Temp");
    }

    #[test]
    fn test_parse_path_topic_default_format() {
        let topic = Topic::parse("opc/plant1/path/Objects/+/Temperature").unwrap();

        assert!(topic.is_path());
        assert_eq!(topic.format, OutputFormat::Raw);
        assert_eq!(topic.address, "Objects/+/Temperature");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Topic::parse(""), Err(TopicError::Empty));
        assert!(matches!(
            Topic::parse("modbus/x/node/1"),
            Err(TopicError::UnknownSystem(_))
        ));
        assert!(matches!(
            Topic::parse("plc/x/tag/1"),
            Err(TopicError::UnknownTopicType(_))
        ));
        assert!(matches!(
            Topic::parse("plc/x/node:xml/1"),
            Err(TopicError::UnknownFormat(_))
        ));
        assert!(matches!(
            Topic::parse("plc/x/node"),
            Err(TopicError::MissingAddress(_))
        ));
    }

    #[test]
    fn test_display_matches_parse_input() {
        let text = "dds/domain0/node:pretty/ShapeType/Square";
        assert_eq!(Topic::parse(text).unwrap().to_string(), text);

        let node = Topic::node(SystemType::Plc, "press", "holding-register:10");
        assert_eq!(node.topic_name, "plc/press/node/holding-register:10");
    }

    #[test]
    fn test_equality_ignores_format_and_browse_path() {
        let a = Topic::parse("opc/s/node/i=2258").unwrap();
        let mut b = a.clone().with_format(OutputFormat::Json);
        b.browse_path = Some("Objects/Server/ServerStatus".to_string());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));

        let c = b.clone().with_topic_name("other");
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_resolved_topic() {
        let path = Topic::parse("opc/s/path:json/Objects/+/Temperature").unwrap();
        let concrete = path.resolved(&ResolvedAddress::new(
            "ns=2;s=A.Temperature",
            "Objects/A/Temperature",
        ));

        assert_eq!(concrete.topic_type, TopicType::NodeId);
        assert_eq!(concrete.address, "ns=2;s=A.Temperature");
        assert_eq!(concrete.topic_name, path.topic_name);
        assert_eq!(concrete.format, OutputFormat::Json);
        assert_eq!(concrete.source_path.as_deref(), Some("Objects/+/Temperature"));
        assert_ne!(concrete, path);
    }
}
