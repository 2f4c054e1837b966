//! The OPC-UA driver.
//!
//! Topics address nodes by id (`opc/<id>/node/ns=2;s=Line1.Temperature`) or by
//! browse path from a standard folder (`opc/<id>/path/Objects/Line1/+/Temperature`).

use std::sync::Arc;

use async_trait::async_trait;

use fieldgate_driver_framework::{
    BrowseDirection, BrowseEntry, BrowseQuery, BrowseRequest, Bus, CanonicalValue, ClientError,
    ClientFactory, ClientResult, CoreOptions, Driver, DriverCore, DriverHealth, DriverState,
    OutputFormat, Result, RootMap, StatusCode, SystemType, Topic, Variant, WriteValue,
};

use crate::client::OpcUaClient;
use crate::coerce::coerce;
use crate::config::OpcUaConfig;
use crate::node_id::{OBJECTS, canonical, root_folder};

pub struct OpcUaDriver<C: OpcUaClient> {
    core: Arc<DriverCore<C>>,
    endpoint: String,
}

impl<C: OpcUaClient> OpcUaDriver<C> {
    /// Create the driver. Must be called inside a runtime.
    pub fn new(config: &OpcUaConfig, factory: Arc<dyn ClientFactory<C>>, bus: Arc<dyn Bus>) -> Self {
        let mut options = CoreOptions::new(&config.id, SystemType::OpcUa);
        options.retry = config.retry.clone();
        options.monitoring = config.monitoring.clone();
        options.publish_buffer = config.publish_buffer;
        options.request_timeout = config.request_timeout();

        let roots: RootMap = Arc::new(|name: &str| root_folder(name).map(str::to_string));
        let core = DriverCore::new(options, factory, bus)
            .with_path_resolution(roots, &config.address_cache)
            .with_write_queue(&config.write_queue);

        Self {
            core: Arc::new(core),
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn core(&self) -> &Arc<DriverCore<C>> {
        &self.core
    }

    /// Coerce one write to the data type of its node.
    async fn prepare_write(&self, client: &C, address: &str, value: &Variant) -> ClientResult<WriteValue> {
        let address = canonical(address).map_err(|_| ClientError::InvalidAddress(address.to_string()))?;
        let timeout = self.core.request_timeout();
        let data_type = tokio::time::timeout(timeout, client.data_type(&address))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        let value = coerce(value, data_type)?;
        Ok(WriteValue::new(address, value))
    }
}

/// Value carried by a publish: the `Value` field of a JSON envelope, or the value itself.
fn published_value(topic: &Topic, value: Variant) -> Variant {
    match (topic.format, value) {
        (OutputFormat::Json | OutputFormat::PrettyJson, Variant::Json(serde_json::Value::Object(mut map))) => {
            match map.remove("Value") {
                Some(inner) => Variant::from_json(inner),
                None => Variant::Json(serde_json::Value::Object(map)),
            }
        }
        (_, value) => value,
    }
}

#[async_trait]
impl<C: OpcUaClient> Driver for OpcUaDriver<C> {
    fn system_type(&self) -> SystemType {
        SystemType::OpcUa
    }

    fn id(&self) -> &str {
        self.core.id()
    }

    fn state(&self) -> DriverState {
        self.core.state()
    }

    async fn connect(&self) -> Result<()> {
        self.core.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.disconnect().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.core.shutdown().await
    }

    async fn subscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool> {
        let mut results = vec![false; topics.len()];
        let mut accepted = Vec::with_capacity(topics.len());
        for (index, mut topic) in topics.into_iter().enumerate() {
            if !topic.is_path() {
                match canonical(&topic.address) {
                    Ok(address) => topic.address = address,
                    Err(e) => {
                        tracing::warn!(topic = %topic.topic_name, error = %e, "Invalid node id");
                        continue;
                    }
                }
            }
            accepted.push((index, topic));
        }

        let (indices, topics): (Vec<usize>, Vec<Topic>) = accepted.into_iter().unzip();
        for (index, ok) in indices.into_iter().zip(self.core.subscribe(topics).await) {
            results[index] = ok;
        }
        results
    }

    async fn unsubscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool> {
        let topics = topics
            .into_iter()
            .map(|mut topic| {
                if !topic.is_path()
                    && let Ok(address) = canonical(&topic.address)
                {
                    topic.address = address;
                }
                topic
            })
            .collect();
        self.core.unsubscribe(topics).await
    }

    async fn publish_topic(&self, topic: Topic, value: Variant) -> bool {
        let value = published_value(&topic, value);
        let addresses = match self.core.addresses_of(&topic).await {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(topic = %topic.topic_name, error = %e, "Cannot resolve publish topic");
                return false;
            }
        };
        if addresses.is_empty() {
            tracing::warn!(topic = %topic.topic_name, "No node matches publish topic");
            return false;
        }

        let items = addresses.into_iter().map(|a| (a, value.clone())).collect();
        self.write(items).await.into_iter().all(|ok| ok)
    }

    async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>> {
        let mut results: Vec<Option<ClientResult<CanonicalValue>>> = Vec::with_capacity(addresses.len());
        let mut valid = Vec::new();
        let mut positions = Vec::new();
        for address in addresses {
            match canonical(&address) {
                Ok(node) => {
                    positions.push(results.len());
                    valid.push(node);
                    results.push(None);
                }
                Err(_) => results.push(Some(Err(ClientError::InvalidAddress(address)))),
            }
        }

        for (position, value) in positions.into_iter().zip(self.core.read(valid).await) {
            results[position] = Some(value);
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))))
            .collect()
    }

    async fn write(&self, items: Vec<(String, Variant)>) -> Vec<bool> {
        let client = match self.core.lifecycle().connected_client() {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(error = %e, count = items.len(), "Write while not connected");
                for _ in &items {
                    self.core.health().record_write(false);
                }
                return vec![false; items.len()];
            }
        };

        let mut results = vec![false; items.len()];
        let mut prepared = Vec::with_capacity(items.len());
        let mut positions = Vec::with_capacity(items.len());
        for (index, (address, value)) in items.iter().enumerate() {
            match self.prepare_write(&client, address, value).await {
                Ok(write) => {
                    positions.push(index);
                    prepared.push(write);
                }
                Err(e) => {
                    tracing::warn!(node = %address, value = %value, error = %e, "Write rejected");
                    self.core.health().record_write(false);
                }
            }
        }

        for (index, ok) in positions.into_iter().zip(self.core.write(prepared).await) {
            results[index] = ok;
        }
        results
    }

    async fn browse(&self, query: BrowseQuery) -> ClientResult<Vec<BrowseEntry>> {
        let node = match &query.node {
            Some(node) => canonical(node).map_err(|_| ClientError::InvalidAddress(node.clone()))?,
            None => OBJECTS.to_string(),
        };
        let base_path = ["Root", "Objects", "Types", "Views"]
            .into_iter()
            .find(|name| root_folder(name) == Some(node.as_str()))
            .unwrap_or_default();

        let mut request = if query.full_tree {
            BrowseRequest::tree(node, base_path, query.flat)
        } else {
            BrowseRequest::children(node, base_path)
        };
        if query.reverse {
            request = request.with_direction(BrowseDirection::Inverse);
        }
        self.core.browse(request).await
    }

    fn health(&self) -> Option<Arc<DriverHealth>> {
        Some(self.core.health().clone())
    }

    fn info(&self) -> serde_json::Value {
        let mut info = self.core.info();
        info["Endpoint"] = serde_json::Value::String(self.endpoint.clone());
        if let Some(client) = self.core.lifecycle().client() {
            info["Server"] = client.server_info();
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgate_driver_framework::TopicType;

    #[test]
    fn test_published_value_unwraps_json_envelope() {
        let mut topic = Topic::node(SystemType::OpcUa, "line1", "ns=2;s=A");
        topic.format = OutputFormat::Json;
        let envelope = Variant::Json(serde_json::json!({"Topic": "x", "Value": 42}));
        assert_eq!(published_value(&topic, envelope), Variant::Int(42));

        topic.format = OutputFormat::Raw;
        let raw = Variant::Json(serde_json::json!({"Value": 42}));
        assert_eq!(published_value(&topic, raw.clone()), raw);
        assert_eq!(topic.topic_type, TopicType::NodeId);
    }
}
