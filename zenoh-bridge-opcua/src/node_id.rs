//! OPC-UA node id text syntax.
//!
//! ```text
//! [ns=<namespace>;]<i|s|g|b>=<identifier>
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Standard folders of every server.
pub const ROOT: &str = "i=84";
pub const OBJECTS: &str = "i=85";
pub const TYPES: &str = "i=86";
pub const VIEWS: &str = "i=87";

/// Node id of a standard folder by browse name.
pub fn root_folder(name: &str) -> Option<&'static str> {
    match name {
        "Root" => Some(ROOT),
        "Objects" => Some(OBJECTS),
        "Types" => Some(TYPES),
        "Views" => Some(VIEWS),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("empty node id")]
    Empty,

    #[error("invalid namespace in '{0}'")]
    Namespace(String),

    #[error("unknown identifier type in '{0}'")]
    IdentifierType(String),

    #[error("invalid identifier in '{0}'")]
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(String),
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, NodeIdError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(NodeIdError::Empty);
        }

        let (namespace, rest) = match text.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, rest) = rest
                    .split_once(';')
                    .ok_or_else(|| NodeIdError::Namespace(text.to_string()))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| NodeIdError::Namespace(text.to_string()))?;
                (ns, rest)
            }
            None => (0, text),
        };

        let (kind, value) = rest
            .split_once('=')
            .ok_or_else(|| NodeIdError::IdentifierType(text.to_string()))?;
        let invalid = || NodeIdError::Identifier(text.to_string());

        let identifier = match kind {
            "i" => Identifier::Numeric(value.parse().map_err(|_| invalid())?),
            "s" if !value.is_empty() => Identifier::String(value.to_string()),
            "g" if is_guid(value) => Identifier::Guid(value.to_ascii_lowercase()),
            "b" if is_base64(value) => Identifier::Opaque(value.to_string()),
            "s" | "g" | "b" => return Err(invalid()),
            _ => return Err(NodeIdError::IdentifierType(text.to_string())),
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

fn is_guid(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_base64(value: &str) -> bool {
    let data = value.trim_end_matches('=');
    !data.is_empty()
        && value.len() - data.len() <= 2
        && data
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={}", v),
            Identifier::Opaque(v) => write!(f, "b={}", v),
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical text form of a node id, or the parse error.
pub fn canonical(text: &str) -> Result<String, NodeIdError> {
    NodeId::parse(text).map(|id| id.to_string())
}
