//! The DDS driver.
//!
//! Topics name a DDS topic by configured type id (`dds/<id>/node/Shape/Square`).
//! Received samples are decoded to JSON and published with their source time;
//! publishing to a topic encodes the value and writes it to the domain.

use std::sync::Arc;

use async_trait::async_trait;

use fieldgate_driver_framework::{
    BrowseEntry, BrowseQuery, Bus, CanonicalValue, ClientError, ClientFactory, ClientResult,
    CoreOptions, DataValue, Driver, DriverCore, DriverHealth, DriverState, OutputFormat,
    ProtocolClient, Result, StatusCode, SystemType, Topic, ValueMapper, Variant, WriteValue,
};

use crate::config::DdsConfig;
use crate::domain::TopicAddress;
use crate::types::TypeRegistry;

pub struct DdsDriver<C: ProtocolClient> {
    core: Arc<DriverCore<C>>,
    types: Arc<TypeRegistry>,
    domain: u32,
}

impl<C: ProtocolClient> DdsDriver<C> {
    /// Create the driver. Must be called inside a runtime.
    pub fn new(
        config: &DdsConfig,
        types: Arc<TypeRegistry>,
        factory: Arc<dyn ClientFactory<C>>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let mut options = CoreOptions::new(&config.id, SystemType::Dds);
        options.retry = config.retry.clone();
        options.publish_buffer = config.publish_buffer;
        options.request_timeout = config.request_timeout();

        let decoder = types.clone();
        let mapper: ValueMapper = Arc::new(move |address: &str, value: DataValue| decode_sample(&decoder, address, value));
        let core = DriverCore::new(options, factory, bus).with_mapper(mapper);

        Self {
            core: Arc::new(core),
            types,
            domain: config.domain,
        }
    }

    pub fn core(&self) -> &Arc<DriverCore<C>> {
        &self.core
    }

    fn check_address(&self, address: &str) -> ClientResult<TopicAddress> {
        let address = TopicAddress::parse(address)?;
        if self.types.get(&address.type_id).is_none() {
            return Err(ClientError::InvalidAddress(format!(
                "unknown type id '{}'",
                address.type_id
            )));
        }
        Ok(address)
    }

    /// Encode a published value with the type support of its topic.
    fn encode(&self, address: &TopicAddress, value: Variant) -> ClientResult<Vec<u8>> {
        let support = self
            .types
            .get(&address.type_id)
            .ok_or_else(|| ClientError::InvalidAddress(address.to_string()))?;
        let sample = match value {
            Variant::String(text) => serde_json::from_str(&text)
                .map_err(|e| ClientError::TypeMismatch(format!("sample is not JSON: {}", e)))?,
            Variant::Bytes(data) => return Ok(data),
            other => other.to_json(),
        };
        support
            .encode(&sample)
            .map_err(|e| ClientError::TypeMismatch(e.to_string()))
    }
}

/// Decode an encoded sample to JSON; undecodable samples are dropped.
fn decode_sample(types: &TypeRegistry, address: &str, mut value: DataValue) -> Option<DataValue> {
    let Variant::Bytes(data) = &value.value else {
        return Some(value);
    };
    let support = TopicAddress::parse(address)
        .ok()
        .and_then(|a| types.get(&a.type_id))?;
    match support.decode(data) {
        Ok(json) => {
            value.value = Variant::Json(json);
            Some(value)
        }
        Err(e) => {
            tracing::warn!(address = %address, type_name = %support.type_name(), error = %e, "Dropping undecodable sample");
            None
        }
    }
}

/// Value carried by a publish: the `Value` field of a JSON envelope, or the value itself.
fn published_value(topic: &Topic, value: Variant) -> Variant {
    match (topic.format, value) {
        (OutputFormat::Json | OutputFormat::PrettyJson, Variant::Json(serde_json::Value::Object(mut map))) => {
            match map.remove("Value") {
                Some(inner) => Variant::Json(inner),
                None => Variant::Json(serde_json::Value::Object(map)),
            }
        }
        (_, value) => value,
    }
}

#[async_trait]
impl<C: ProtocolClient> Driver for DdsDriver<C> {
    fn system_type(&self) -> SystemType {
        SystemType::Dds
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
        for (index, topic) in topics.into_iter().enumerate() {
            if topic.is_path() {
                tracing::warn!(topic = %topic.topic_name, "Path topics are not supported");
                continue;
            }
            if let Err(e) = self.check_address(&topic.address) {
                tracing::warn!(topic = %topic.topic_name, error = %e, "Unhandled topic type");
                continue;
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
        self.core.unsubscribe(topics).await
    }

    async fn publish_topic(&self, topic: Topic, value: Variant) -> bool {
        let outcome = async {
            if topic.is_path() {
                return Err(ClientError::Unsupported("path topics"));
            }
            let address = self.check_address(&topic.address)?;
            let data = self.encode(&address, published_value(&topic, value))?;
            let client = self.core.lifecycle().connected_client()?;

            let write = WriteValue::new(address.to_string(), Variant::Bytes(data));
            let timeout = self.core.request_timeout();
            let statuses = tokio::time::timeout(timeout, client.write_values(&[write]))
                .await
                .map_err(|_| ClientError::Timeout(timeout))??;
            match statuses.first() {
                Some(status) if status.is_good() => Ok(()),
                Some(status) => Err(ClientError::Status(*status)),
                None => Err(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR)),
            }
        }
        .await;

        let ok = match outcome {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(topic = %topic.topic_name, error = %e, "Publish failed");
                false
            }
        };
        self.core.health().record_write(ok);
        ok
    }

    async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>> {
        vec![Err(ClientError::Unsupported("read")); addresses.len()]
    }

    async fn write(&self, items: Vec<(String, Variant)>) -> Vec<bool> {
        tracing::debug!(count = items.len(), "Write requests are not supported, use publish");
        vec![false; items.len()]
    }

    async fn browse(&self, _query: BrowseQuery) -> ClientResult<Vec<BrowseEntry>> {
        Err(ClientError::Unsupported("browse"))
    }

    fn health(&self) -> Option<Arc<DriverHealth>> {
        Some(self.core.health().clone())
    }

    fn info(&self) -> serde_json::Value {
        let mut info = self.core.info();
        info["Domain"] = serde_json::Value::from(self.domain);
        info["TopicTypes"] = self.types.ids().collect::<Vec<_>>().into();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicTypeConfig;

    fn types() -> TypeRegistry {
        TypeRegistry::from_config(&[TopicTypeConfig {
            id: "Shape".into(),
            type_name: "ShapeType".into(),
        }])
        .unwrap()
    }

    #[test]
    fn test_decode_sample() {
        let types = types();
        let shape = serde_json::json!({"color": "RED", "x": 1, "y": 2, "shapesize": 30});
        let data = types.get("Shape").unwrap().encode(&shape).unwrap();

        let decoded = decode_sample(&types, "Shape/Square", DataValue::good(Variant::Bytes(data))).unwrap();
        assert_eq!(decoded.value, Variant::Json(shape));

        let garbage = DataValue::good(Variant::Bytes(vec![1, 2]));
        assert!(decode_sample(&types, "Shape/Square", garbage).is_none());

        let plain = DataValue::good(Variant::Int(1));
        assert_eq!(decode_sample(&types, "Shape/Square", plain.clone()), Some(plain));
    }

    #[test]
    fn test_published_value_keeps_envelope_payload_as_json() {
        let mut topic = Topic::node(SystemType::Dds, "shapes", "Shape/Square");
        topic.format = OutputFormat::Json;
        let envelope = Variant::Json(serde_json::json!({"Value": {"x": 1}}));
        assert_eq!(
            published_value(&topic, envelope),
            Variant::Json(serde_json::json!({"x": 1}))
        );
    }
}
