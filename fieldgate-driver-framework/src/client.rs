//! The narrow interface the runtime drives protocol clients through.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use fieldgate_common::{DataValue, StatusCode, Variant};

use crate::config::MonitoringConfig;

/// Result type for protocol client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors reported by protocol clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("Not connected!")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("communication error: {0}")]
    Communication(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("bad status {0}")]
    Status(StatusCode),
}

impl ClientError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_)
                | ClientError::NotConnected
                | ClientError::Timeout(_)
                | ClientError::Communication(_)
        )
    }

    /// Status code reported to callers for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::Connect(_) | ClientError::NotConnected => StatusCode::BAD_NOT_CONNECTED,
            ClientError::Timeout(_) => StatusCode::BAD_TIMEOUT,
            ClientError::Communication(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            ClientError::InvalidEndpoint(_) => StatusCode::BAD_UNEXPECTED_ERROR,
            ClientError::InvalidAddress(_) => StatusCode::BAD_NODE_ID_INVALID,
            ClientError::UnknownNode(_) => StatusCode::BAD_NODE_ID_UNKNOWN,
            ClientError::TypeMismatch(_) => StatusCode::BAD_TYPE_MISMATCH,
            ClientError::Unsupported(_) => StatusCode::BAD_NOT_SUPPORTED,
            ClientError::Status(code) => *code,
        }
    }
}

/// Class of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

/// Direction of the references followed by a browse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowseDirection {
    #[default]
    Forward,
    Inverse,
}

/// One child returned by a browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseNode {
    pub address: String,
    pub browse_name: String,
    pub display_name: String,
    pub class: NodeClass,
}

impl BrowseNode {
    pub fn new(
        address: impl Into<String>,
        browse_name: impl Into<String>,
        class: NodeClass,
    ) -> Self {
        let browse_name = browse_name.into();
        Self {
            address: address.into(),
            display_name: browse_name.clone(),
            browse_name,
            class,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// Handle of a live native subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle(pub u64);

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Invoked by the client for every change of a monitored item, in delivery order.
pub type ValueCallback = Arc<dyn Fn(DataValue) + Send + Sync>;

/// Request to monitor one concrete address.
#[derive(Clone)]
pub struct MonitorRequest {
    pub address: String,
    pub parameters: MonitoringConfig,
    pub on_change: ValueCallback,
}

impl fmt::Debug for MonitorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorRequest")
            .field("address", &self.address)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// One value of a multi-address write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    pub address: String,
    pub value: Variant,
    pub source_time: Option<DateTime<Utc>>,
}

impl WriteValue {
    pub fn new(address: impl Into<String>, value: Variant) -> Self {
        Self {
            address: address.into(),
            value,
            source_time: None,
        }
    }
}

/// Operations a client supports natively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub browse: bool,
    pub read: bool,
    pub write: bool,
    pub subscribe: bool,
}

/// An opaque protocol client.
///
/// Result vectors of the multi-item operations have one entry per input item,
/// in input order.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Establish the connection and complete the protocol handshake.
    async fn connect(&self) -> ClientResult<()>;

    async fn disconnect(&self) -> ClientResult<()>;

    /// Live connection state. Must be cheap; the supervisor polls it.
    fn is_connected(&self) -> bool;

    fn capabilities(&self) -> Capabilities;

    async fn browse_children(
        &self,
        _node: &str,
        _direction: BrowseDirection,
    ) -> ClientResult<Vec<BrowseNode>> {
        Err(ClientError::Unsupported("browse"))
    }

    async fn read_values(&self, _addresses: &[String]) -> ClientResult<Vec<DataValue>> {
        Err(ClientError::Unsupported("read"))
    }

    async fn write_values(&self, _values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        Err(ClientError::Unsupported("write"))
    }

    async fn subscribe(
        &self,
        _requests: Vec<MonitorRequest>,
    ) -> ClientResult<Vec<ClientResult<ItemHandle>>> {
        Err(ClientError::Unsupported("subscribe"))
    }

    async fn unsubscribe(&self, _handles: &[ItemHandle]) -> ClientResult<()> {
        Err(ClientError::Unsupported("unsubscribe"))
    }
}

/// Builds protocol clients; invoked for every connection attempt.
#[async_trait]
pub trait ClientFactory<C>: Send + Sync + 'static {
    async fn create(&self) -> ClientResult<Arc<C>>;
}
