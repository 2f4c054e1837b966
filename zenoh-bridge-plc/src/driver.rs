//! The PLC driver.
//!
//! Topics address items directly (`plc/<id>/node/holding-register:10:f32`).
//! Subscriptions are served by polling; there is no address space to browse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fieldgate_driver_framework::{
    BrowseEntry, BrowseQuery, Bus, CanonicalValue, ClientError, ClientFactory, ClientResult,
    CoreOptions, DataValue, Driver, DriverCore, DriverHealth, DriverState, OutputFormat,
    ProtocolClient, Result, StatusCode, SystemType, Topic, ValueMapper, Variant, WriteValue,
};

use crate::address::PlcAddress;
use crate::client::{PlcClient, PlcClientFactory, RegisterIo};
use crate::config::PlcConfig;
use crate::polling::{Polled, PolledFactory};

/// Driver over a register transport, with polled subscriptions.
pub type RegisterDriver<R> = PlcDriver<Polled<PlcClient<R>>>;

pub struct PlcDriver<C: ProtocolClient> {
    core: Arc<DriverCore<C>>,
    connection: String,
    write_timeout: Duration,
}

impl<C: ProtocolClient> PlcDriver<C> {
    /// Create the driver. Must be called inside a runtime.
    pub fn new(config: &PlcConfig, factory: Arc<dyn ClientFactory<C>>, bus: Arc<dyn Bus>) -> Self {
        let mut options = CoreOptions::new(&config.id, SystemType::Plc);
        options.retry = config.retry.clone();
        options.publish_buffer = config.publish_buffer;
        options.request_timeout = config.read_timeout();

        let mapper: ValueMapper = Arc::new(|_address: &str, value: DataValue| Some(first_element(value)));
        let core = DriverCore::new(options, factory, bus).with_mapper(mapper);

        Self {
            core: Arc::new(core),
            connection: config.connection.describe(),
            write_timeout: config.write_timeout(),
        }
    }

    pub fn core(&self) -> &Arc<DriverCore<C>> {
        &self.core
    }
}

impl<R: RegisterIo> RegisterDriver<R> {
    /// Create a driver for the device behind `io`.
    pub fn with_registers(config: &PlcConfig, io: Arc<R>, bus: Arc<dyn Bus>) -> Self {
        let clients: Arc<dyn ClientFactory<PlcClient<R>>> = Arc::new(PlcClientFactory::new(io));
        let factory: Arc<dyn ClientFactory<Polled<PlcClient<R>>>> =
            Arc::new(PolledFactory::new(clients, config.polling.clone()));
        Self::new(config, factory, bus)
    }
}

/// Reduce a structured value to its first element; scalars pass through.
fn first_element(mut value: DataValue) -> DataValue {
    value.value = match value.value {
        Variant::Array(items) => items.into_iter().next().unwrap_or_default(),
        Variant::Json(serde_json::Value::Array(items)) => {
            items.into_iter().next().map(Variant::from_json).unwrap_or_default()
        }
        Variant::Json(serde_json::Value::Object(map)) => {
            map.into_iter().next().map(|(_, v)| Variant::from_json(v)).unwrap_or_default()
        }
        other => other,
    };
    value
}

/// Value carried by a publish: the `Value` field of a JSON envelope, or the value itself.
fn published_value(topic: &Topic, value: Variant) -> Variant {
    match (topic.format, value) {
        (OutputFormat::Json | OutputFormat::PrettyJson, Variant::Json(serde_json::Value::Object(mut map))) => {
            map.remove("Value")
                .map(Variant::from_json)
                .unwrap_or(Variant::Json(serde_json::Value::Object(map)))
        }
        (_, value) => value,
    }
}

fn check_address(address: &str) -> ClientResult<()> {
    PlcAddress::parse(address)
        .map(|_| ())
        .map_err(|e| ClientError::InvalidAddress(format!("{}: {}", address, e)))
}

#[async_trait]
impl<C: ProtocolClient> Driver for PlcDriver<C> {
    fn system_type(&self) -> SystemType {
        SystemType::Plc
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
            if let Err(e) = check_address(&topic.address) {
                tracing::warn!(topic = %topic.topic_name, error = %e, "Invalid address");
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
        if topic.is_path() {
            tracing::warn!(topic = %topic.topic_name, "Path topics are not supported");
            return false;
        }
        let value = published_value(&topic, value);
        self.write(vec![(topic.address, value)])
            .await
            .into_iter()
            .all(|ok| ok)
    }

    async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>> {
        let mut results: Vec<Option<ClientResult<CanonicalValue>>> = Vec::with_capacity(addresses.len());
        let mut valid = Vec::new();
        let mut positions = Vec::new();
        for address in addresses {
            match check_address(&address) {
                Ok(()) => {
                    positions.push(results.len());
                    valid.push(address);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        if !valid.is_empty() {
            for (position, value) in positions.into_iter().zip(self.core.read(valid).await) {
                results[position] = Some(value);
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))))
            .collect()
    }

    async fn write(&self, items: Vec<(String, Variant)>) -> Vec<bool> {
        let mut results = vec![false; items.len()];
        let mut valid = Vec::with_capacity(items.len());
        let mut positions = Vec::with_capacity(items.len());
        for (index, (address, value)) in items.into_iter().enumerate() {
            match check_address(&address) {
                Ok(()) => {
                    positions.push(index);
                    valid.push(WriteValue::new(address, value));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Write rejected");
                    self.core.health().record_write(false);
                }
            }
        }
        if valid.is_empty() {
            return results;
        }

        let count = valid.len();
        match tokio::time::timeout(self.write_timeout, self.core.write(valid)).await {
            Ok(outcomes) => {
                for (index, ok) in positions.into_iter().zip(outcomes) {
                    results[index] = ok;
                }
            }
            Err(_) => {
                tracing::warn!(count, timeout_ms = self.write_timeout.as_millis() as u64, "Write timed out");
                for _ in 0..count {
                    self.core.health().record_write(false);
                }
            }
        }
        results
    }

    async fn browse(&self, _query: BrowseQuery) -> ClientResult<Vec<BrowseEntry>> {
        Err(ClientError::Unsupported("browse"))
    }

    fn health(&self) -> Option<Arc<DriverHealth>> {
        Some(self.core.health().clone())
    }

    fn info(&self) -> serde_json::Value {
        let mut info = self.core.info();
        info["Connection"] = serde_json::Value::String(self.connection.clone());
        info
    }
}
