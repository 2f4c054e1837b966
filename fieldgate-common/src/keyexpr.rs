use std::fmt;

use crate::topic::SystemType;

/// Default key expression prefix for all Fieldgate traffic.
pub const KEY_PREFIX: &str = "fieldgate";

/// Request operations served by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOp {
    Read,
    Write,
    Browse,
    Schema,
    Subscribe,
    Unsubscribe,
    Publish,
    Info,
}

impl RequestOp {
    pub const ALL: [RequestOp; 8] = [
        RequestOp::Read,
        RequestOp::Write,
        RequestOp::Browse,
        RequestOp::Schema,
        RequestOp::Subscribe,
        RequestOp::Unsubscribe,
        RequestOp::Publish,
        RequestOp::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOp::Read => "read",
            RequestOp::Write => "write",
            RequestOp::Browse => "browse",
            RequestOp::Schema => "schema",
            RequestOp::Subscribe => "subscribe",
            RequestOp::Unsubscribe => "unsubscribe",
            RequestOp::Publish => "publish",
            RequestOp::Info => "info",
        }
    }
}

impl fmt::Display for RequestOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for the key expressions of one driver instance.
///
/// Key expressions follow the pattern:
/// `<prefix>/<system>/<driver id>/<channel>` for values and
/// `<prefix>/<system>/<driver id>/@/<op>` for requests and status.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
    system: SystemType,
    driver_id: String,
}

impl KeyExprBuilder {
    pub fn new(system: SystemType, driver_id: impl Into<String>) -> Self {
        Self::with_prefix(KEY_PREFIX, system, driver_id)
    }

    pub fn with_prefix(
        prefix: impl Into<String>,
        system: SystemType,
        driver_id: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            system,
            driver_id: driver_id.into(),
        }
    }

    fn base(&self) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            self.system.as_str(),
            sanitize_chunk(&self.driver_id)
        )
    }

    /// Key for a value channel. Characters zenoh reserves are escaped.
    ///
    /// # Example
    /// ```
    /// use fieldgate_common::keyexpr::KeyExprBuilder;
    /// use fieldgate_common::topic::SystemType;
    ///
    /// let builder = KeyExprBuilder::new(SystemType::OpcUa, "plant1");
    /// let key = builder.channel_key("opc/plant1/path/Objects/#");
    /// assert_eq!(key, "fieldgate/opc/plant1/opc/plant1/path/Objects/%23");
    /// ```
    pub fn channel_key(&self, channel: &str) -> String {
        let channel: Vec<String> = channel
            .split('/')
            .filter(|chunk| !chunk.is_empty())
            .map(sanitize_chunk)
            .collect();
        format!("{}/{}", self.base(), channel.join("/"))
    }

    /// Key of a request queryable.
    ///
    /// # Example
    /// ```
    /// use fieldgate_common::keyexpr::{KeyExprBuilder, RequestOp};
    /// use fieldgate_common::topic::SystemType;
    ///
    /// let builder = KeyExprBuilder::new(SystemType::Plc, "press");
    /// assert_eq!(builder.request_key(RequestOp::Read), "fieldgate/plc/press/@/read");
    /// ```
    pub fn request_key(&self, op: RequestOp) -> String {
        format!("{}/@/{}", self.base(), op.as_str())
    }

    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.base())
    }

    pub fn health_key(&self) -> String {
        format!("{}/@/health", self.base())
    }

    /// Wildcard matching every value channel of this driver.
    pub fn driver_wildcard(&self) -> String {
        format!("{}/**", self.base())
    }
}

/// Escape characters that are not allowed inside a zenoh key chunk.
pub fn sanitize_chunk(chunk: &str) -> String {
    let mut out = String::with_capacity(chunk.len());
    for c in chunk.chars() {
        match c {
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '$' => out.push_str("%24"),
            '*' => out.push_str("%2A"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}
