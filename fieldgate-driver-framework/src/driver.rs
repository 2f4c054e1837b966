//! The interface every protocol driver implements.

use std::sync::Arc;

use async_trait::async_trait;

use fieldgate_common::{CanonicalValue, SystemType, Topic, Variant};

use crate::browse::BrowseEntry;
use crate::client::ClientResult;
use crate::error::Result;
use crate::health::DriverHealth;
use crate::lifecycle::DriverState;

/// Parameters of a browse or schema request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowseQuery {
    /// Start node; the driver's default root when absent.
    pub node: Option<String>,
    /// Follow inverse references.
    pub reverse: bool,
    /// Walk the whole tree instead of one level.
    pub full_tree: bool,
    /// Flatten nested results.
    pub flat: bool,
}

/// A protocol driver as seen by the gateway.
///
/// Every operation reports failures in its return value; per-item operations
/// return one result per input item, in order.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn system_type(&self) -> SystemType;

    fn id(&self) -> &str;

    fn state(&self) -> DriverState;

    /// Resolves once connected; retries transient failures.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Disconnect and stop background tasks. The driver is not reused afterwards.
    async fn shutdown(&self) -> Result<()> {
        self.disconnect().await
    }

    async fn subscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool>;

    async fn unsubscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool>;

    /// Write a value received for a topic to the device.
    async fn publish_topic(&self, topic: Topic, value: Variant) -> bool;

    async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>>;

    async fn write(&self, items: Vec<(String, Variant)>) -> Vec<bool>;

    async fn browse(&self, query: BrowseQuery) -> ClientResult<Vec<BrowseEntry>>;

    /// Counters published on the health key.
    fn health(&self) -> Option<Arc<DriverHealth>> {
        None
    }

    /// Runtime details for the info request.
    fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "Id": self.id(),
            "System": self.system_type().as_str(),
            "State": self.state(),
        })
    }
}
