//! Protocol-independent driver machinery shared by every bridge.
//!
//! [`DriverCore`] owns the connection lifecycle, the monitored item registry,
//! the value pipeline and the optional write queue and path resolver. A
//! protocol driver wraps one and adds its own address handling on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use fieldgate_common::{CanonicalValue, DataValue, StatusCode, SystemType, Topic};

use crate::browse::{BrowseEntry, BrowseRequest, browse_tree};
use crate::client::{
    ClientError, ClientFactory, ClientResult, MonitorRequest, ProtocolClient, ValueCallback,
    WriteValue,
};
use crate::config::{AddressCacheConfig, MonitoringConfig, RetryConfig, WriteQueueConfig};
use crate::error::Result;
use crate::health::DriverHealth;
use crate::lifecycle::{DriverState, Lifecycle, ReconnectHandler};
use crate::pipeline::{Bus, ValuePipeline, normalize};
use crate::registry::MonitoredItemRegistry;
use crate::resolver::{AddressResolver, RootMap};
use crate::write_queue::{BatchWriter, WriteQueue};

/// Post-processing applied to every value read or received for an address.
/// Returning `None` discards the value.
pub type ValueMapper = Arc<dyn Fn(&str, DataValue) -> Option<DataValue> + Send + Sync>;

/// Settings for [`DriverCore::new`].
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub id: String,
    pub system_type: SystemType,
    pub retry: RetryConfig,
    pub monitoring: MonitoringConfig,
    /// Capacity of the publish buffer.
    pub publish_buffer: usize,
    /// Timeout of direct reads, writes and browses.
    pub request_timeout: Duration,
}

impl CoreOptions {
    pub fn new(id: impl Into<String>, system_type: SystemType) -> Self {
        Self {
            id: id.into(),
            system_type,
            retry: RetryConfig::default(),
            monitoring: MonitoringConfig::default(),
            publish_buffer: 1024,
            request_timeout: Duration::from_secs(5),
        }
    }
}

pub struct DriverCore<C: ProtocolClient> {
    id: String,
    system_type: SystemType,
    lifecycle: Arc<Lifecycle<C>>,
    registry: MonitoredItemRegistry,
    pipeline: ValuePipeline,
    health: Arc<DriverHealth>,
    monitoring: MonitoringConfig,
    request_timeout: Duration,
    resolver: Option<AddressResolver>,
    write_queue: Option<Arc<WriteQueue>>,
    mapper: Option<ValueMapper>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: ProtocolClient> DriverCore<C> {
    /// Create the core and start its publish task. Must be called inside a runtime.
    pub fn new(options: CoreOptions, factory: Arc<dyn ClientFactory<C>>, bus: Arc<dyn Bus>) -> Self {
        let health = Arc::new(DriverHealth::new(&options.id));
        let lifecycle = Arc::new(Lifecycle::new(
            options.id.clone(),
            factory,
            &options.retry,
            health.clone(),
        ));
        let (pipeline, publish_task) = ValuePipeline::start(
            bus,
            options.publish_buffer,
            health.clone(),
            lifecycle.shutdown_signal(),
        );

        Self {
            id: options.id,
            system_type: options.system_type,
            lifecycle,
            registry: MonitoredItemRegistry::new(),
            pipeline,
            health,
            monitoring: options.monitoring,
            request_timeout: options.request_timeout,
            resolver: None,
            write_queue: None,
            mapper: None,
            supervisor: Mutex::new(None),
            tasks: Mutex::new(vec![publish_task]),
        }
    }

    /// Enable path topics, resolved by browsing from the roots `roots` knows.
    pub fn with_path_resolution(mut self, roots: RootMap, cache: &AddressCacheConfig) -> Self {
        let source = self.lifecycle.clone();
        self.resolver = Some(AddressResolver::new(
            source,
            roots,
            cache,
            self.request_timeout,
        ));
        self
    }

    /// Route writes through a bounded batching queue.
    pub fn with_write_queue(mut self, config: &WriteQueueConfig) -> Self {
        let writer: Arc<dyn BatchWriter> = self.lifecycle.clone();
        let (queue, task) = WriteQueue::start(
            writer,
            config,
            self.health.clone(),
            self.lifecycle.shutdown_signal(),
        );
        self.write_queue = Some(queue);
        self.tasks.lock().push(task);
        self
    }

    pub fn with_mapper(mut self, mapper: ValueMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    pub fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle<C>> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &MonitoredItemRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<DriverHealth> {
        &self.health
    }

    pub fn pipeline(&self) -> &ValuePipeline {
        &self.pipeline
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Connect, start supervision and subscribe everything that is pending.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.lifecycle.connect().await?;

        {
            let mut supervisor = self.supervisor.lock();
            if supervisor.as_ref().is_none_or(|task| task.is_finished()) {
                let handler: Arc<dyn ReconnectHandler> = self.clone();
                *supervisor = Some(self.lifecycle.spawn_supervisor(handler));
            }
        }

        self.resubscribe_all().await;
        Ok(())
    }

    /// Close the connection and forget every subscription.
    pub async fn disconnect(&self) -> Result<()> {
        let dropped = self.registry.clear();
        if dropped > 0 {
            tracing::debug!(driver = %self.id, dropped, "Cleared subscriptions");
        }
        self.lifecycle.disconnect().await
    }

    /// Stop background tasks and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        self.lifecycle.shutdown();
        let result = self.disconnect().await;

        let supervisor = self.supervisor.lock().take();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in supervisor.into_iter().chain(tasks) {
            if let Err(e) = task.await {
                tracing::debug!(driver = %self.id, error = %e, "Background task ended abnormally");
            }
        }
        result
    }

    /// Subscribe topics. One result per topic.
    ///
    /// While disconnected topics are kept pending and succeed. Path topics are
    /// resolved first; a path that matches nothing succeeds with no subscription.
    pub async fn subscribe(&self, topics: Vec<Topic>) -> Vec<bool> {
        if !self.lifecycle.is_connected() {
            tracing::debug!(driver = %self.id, count = topics.len(), "Not connected, keeping subscriptions pending");
            let count = topics.len();
            for topic in topics {
                self.registry.add_pending(topic);
            }
            return vec![true; count];
        }

        let mut results = vec![true; topics.len()];
        let mut concrete: Vec<(usize, Topic)> = Vec::new();

        for (index, topic) in topics.into_iter().enumerate() {
            if !topic.is_path() {
                concrete.push((index, topic));
                continue;
            }
            match self.resolve(&topic).await {
                Ok(resolved) => {
                    if resolved.is_empty() {
                        tracing::info!(driver = %self.id, path = %topic.address, "Path matched no variables");
                    }
                    concrete.extend(resolved.into_iter().map(|t| (index, t)));
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(driver = %self.id, path = %topic.address, error = %e, "Path resolution deferred");
                    self.registry.add_pending(topic);
                }
                Err(e) => {
                    tracing::warn!(driver = %self.id, path = %topic.address, error = %e, "Path resolution failed");
                    results[index] = false;
                }
            }
        }

        let (indices, concrete): (Vec<usize>, Vec<Topic>) = concrete.into_iter().unzip();
        let outcomes = self.subscribe_concrete(concrete).await;
        for (index, ok) in indices.into_iter().zip(outcomes) {
            if !ok {
                results[index] = false;
            }
        }
        results
    }

    /// Concrete addresses a topic stands for: itself, or the resolution of its path.
    pub async fn addresses_of(&self, topic: &Topic) -> ClientResult<Vec<String>> {
        if !topic.is_path() {
            return Ok(vec![topic.address.clone()]);
        }
        Ok(self
            .resolve(topic)
            .await?
            .into_iter()
            .map(|t| t.address)
            .collect())
    }

    async fn resolve(&self, topic: &Topic) -> ClientResult<Vec<Topic>> {
        let Some(resolver) = &self.resolver else {
            return Err(ClientError::Unsupported("path topics"));
        };
        let resolved = resolver.resolve(&topic.address).await?;
        Ok(resolved.iter().map(|r| topic.resolved(r)).collect())
    }

    async fn subscribe_concrete(&self, topics: Vec<Topic>) -> Vec<bool> {
        if topics.is_empty() {
            return Vec::new();
        }

        let client = match self.lifecycle.connected_client() {
            Ok(client) => client,
            Err(_) => {
                let count = topics.len();
                for topic in topics {
                    self.registry.add_pending(topic);
                }
                return vec![true; count];
            }
        };

        let requests = topics.iter().map(|t| self.monitor_request(t)).collect();
        let outcomes = match client.subscribe(requests).await {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_transient() => {
                tracing::warn!(driver = %self.id, error = %e, "Subscribe interrupted, keeping topics pending");
                let count = topics.len();
                for topic in topics {
                    self.registry.add_pending(topic);
                }
                return vec![true; count];
            }
            Err(e) => {
                tracing::warn!(driver = %self.id, error = %e, "Subscribe failed");
                return vec![false; topics.len()];
            }
        };

        let mut outcomes = outcomes.into_iter();
        let mut replaced = Vec::new();
        let mut results = Vec::with_capacity(topics.len());

        for topic in topics {
            match outcomes.next() {
                Some(Ok(handle)) => {
                    tracing::debug!(driver = %self.id, address = %topic.address, %handle, "Monitoring");
                    if let Some(old) = self.registry.add(handle, topic) {
                        replaced.push(old);
                    }
                    results.push(true);
                }
                Some(Err(e)) if e.is_transient() => {
                    self.registry.add_pending(topic);
                    results.push(true);
                }
                Some(Err(e)) => {
                    tracing::warn!(driver = %self.id, address = %topic.address, error = %e, "Monitored item rejected");
                    results.push(false);
                }
                None => {
                    tracing::warn!(driver = %self.id, address = %topic.address, "No subscribe result for item");
                    results.push(false);
                }
            }
        }

        if !replaced.is_empty() {
            if let Err(e) = client.unsubscribe(&replaced).await {
                tracing::debug!(driver = %self.id, error = %e, "Releasing replaced items failed");
            }
        }
        results
    }

    fn monitor_request(&self, topic: &Topic) -> MonitorRequest {
        let pipeline = self.pipeline.clone();
        let mapper = self.mapper.clone();
        let target = topic.clone();

        let on_change: ValueCallback = Arc::new(move |value: DataValue| {
            let value = match &mapper {
                Some(mapper) => match mapper(&target.address, value) {
                    Some(value) => value,
                    None => return,
                },
                None => value,
            };
            pipeline.submit(&target, value);
        });

        MonitorRequest {
            address: topic.address.clone(),
            parameters: self.monitoring.clone(),
            on_change,
        }
    }

    /// Unsubscribe topics. A topic succeeds when it was subscribed or pending.
    pub async fn unsubscribe(&self, topics: Vec<Topic>) -> Vec<bool> {
        let mut results = Vec::with_capacity(topics.len());
        let mut handles = Vec::new();

        for topic in &topics {
            let found = self.registry.handles_for(topic);
            let pending = self.registry.remove_pending(topic);
            results.push(!found.is_empty() || pending > 0);
            handles.extend(found);
        }

        if handles.is_empty() {
            return results;
        }

        if let Ok(client) = self.lifecycle.connected_client() {
            if let Err(e) = client.unsubscribe(&handles).await {
                tracing::warn!(driver = %self.id, error = %e, "Unsubscribe failed");
            }
        }
        let removed = self.registry.remove_all(&handles);
        tracing::debug!(driver = %self.id, removed, "Unsubscribed");
        results
    }

    /// Subscribe again everything registered or pending.
    pub async fn resubscribe_all(&self) {
        let topics = self.registry.take_all();
        if topics.is_empty() {
            return;
        }

        let count = topics.len();
        let failed = self
            .subscribe(topics)
            .await
            .into_iter()
            .filter(|ok| !ok)
            .count();

        if failed > 0 {
            tracing::warn!(driver = %self.id, count, failed, "Some subscriptions could not be restored");
        } else {
            tracing::info!(driver = %self.id, count, "Subscriptions restored");
        }
    }

    /// Read current values, one result per address.
    pub async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>> {
        let values = match self.read_raw(&addresses).await {
            Ok(values) => values,
            Err(e) => return vec![Err(e); addresses.len()],
        };

        let received = Utc::now();
        let mut values = values.into_iter();
        addresses
            .iter()
            .map(|address| -> ClientResult<CanonicalValue> {
                let value = values
                    .next()
                    .ok_or(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))?;
                let value = match &self.mapper {
                    Some(mapper) => mapper(address, value)
                        .ok_or(ClientError::Status(StatusCode::BAD_TYPE_MISMATCH))?,
                    None => value,
                };
                Ok(normalize(value, received))
            })
            .collect()
    }

    async fn read_raw(&self, addresses: &[String]) -> ClientResult<Vec<DataValue>> {
        let client = self.lifecycle.connected_client()?;
        timeout(self.request_timeout, client.read_values(addresses))
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))?
    }

    /// Write values, one result per item. Queued when a write queue is configured.
    pub async fn write(&self, items: Vec<WriteValue>) -> Vec<bool> {
        if let Some(queue) = &self.write_queue {
            let outcomes: Vec<_> = items
                .into_iter()
                .map(|item| queue.enqueue(item.address, item.value))
                .collect();
            let mut results = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                results.push(outcome.await);
            }
            return results;
        }

        let statuses = timeout(self.request_timeout, self.lifecycle.write_batch(&items))
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))
            .and_then(|statuses| statuses);

        let results: Vec<bool> = match statuses {
            Ok(statuses) if statuses.len() == items.len() => {
                statuses.iter().map(StatusCode::is_good).collect()
            }
            Ok(statuses) => {
                tracing::warn!(driver = %self.id, expected = items.len(), got = statuses.len(), "Write result count mismatch");
                vec![false; items.len()]
            }
            Err(e) => {
                tracing::warn!(driver = %self.id, error = %e, "Write failed");
                vec![false; items.len()]
            }
        };

        for ok in &results {
            self.health.record_write(*ok);
        }
        results
    }

    pub async fn browse(&self, request: BrowseRequest) -> ClientResult<Vec<BrowseEntry>> {
        browse_tree(self.lifecycle.as_ref(), &request, self.request_timeout).await
    }

    /// Runtime details for the info request.
    pub fn info(&self) -> serde_json::Value {
        let state = self.state();
        serde_json::json!({
            "Id": self.id,
            "System": self.system_type.as_str(),
            "State": state,
            "Subscriptions": self.registry.len(),
            "Pending": self.registry.pending_len(),
            "WritesMissed": self.write_queue.as_ref().map_or(0, |q| q.missed()),
            "Health": self.health.snapshot(state),
        })
    }
}

#[async_trait]
impl<C: ProtocolClient> ReconnectHandler for DriverCore<C> {
    async fn on_reconnected(&self) {
        if let Some(resolver) = &self.resolver {
            resolver.invalidate_all();
        }
        self.resubscribe_all().await;
    }
}
