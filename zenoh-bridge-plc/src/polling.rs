//! Subscriptions by periodic reads, for clients without native monitoring.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use fieldgate_driver_framework::{
    BrowseDirection, BrowseNode, Capabilities, ClientError, ClientFactory, ClientResult, DataValue,
    ItemHandle, MonitorRequest, ProtocolClient, StatusCode, ValueCallback, WriteValue,
};

use crate::config::PollingConfig;

struct PolledItem {
    address: String,
    callback: ValueCallback,
    /// Text of the last reported value, for old/new suppression.
    last: Option<String>,
}

type Items = Arc<Mutex<BTreeMap<ItemHandle, PolledItem>>>;

/// Adds polled subscriptions to a client.
///
/// All subscribed items are read in one request per period. A poll that is
/// still running when the next period starts delays it instead of overlapping.
pub struct Polled<C: ProtocolClient> {
    inner: Arc<C>,
    config: PollingConfig,
    items: Items,
    next_handle: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ProtocolClient> Polled<C> {
    pub fn new(inner: Arc<C>, config: PollingConfig) -> Self {
        Self {
            inner,
            config,
            items: Arc::new(Mutex::new(BTreeMap::new())),
            next_handle: AtomicU64::new(1),
            task: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    /// Number of polled items.
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    fn start(&self) {
        if !self.config.enabled() {
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(poll_loop(
            self.inner.clone(),
            self.items.clone(),
            self.config.clone(),
        )));
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl<C: ProtocolClient> Drop for Polled<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<C: ProtocolClient>(inner: Arc<C>, items: Items, config: PollingConfig) {
    let mut interval = tokio::time::interval(config.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let timeout = config.timeout();
    let mut request_id = 0u64;

    loop {
        interval.tick().await;
        if !inner.is_connected() {
            continue;
        }

        let (handles, addresses): (Vec<ItemHandle>, Vec<String>) = items
            .lock()
            .iter()
            .map(|(handle, item)| (*handle, item.address.clone()))
            .unzip();
        if addresses.is_empty() {
            continue;
        }

        request_id += 1;
        tracing::debug!(request = request_id, items = addresses.len(), "Poll request");
        let values = match tokio::time::timeout(timeout, inner.read_values(&addresses)).await {
            Ok(Ok(values)) if values.len() == addresses.len() => values,
            Ok(Ok(values)) => {
                tracing::warn!(request = request_id, expected = addresses.len(), got = values.len(), "Poll result count mismatch");
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(request = request_id, error = %e, "Poll failed");
                continue;
            }
            Err(_) => {
                tracing::warn!(request = request_id, timeout_ms = timeout.as_millis() as u64, "Poll timed out");
                continue;
            }
        };

        let mut changed = Vec::new();
        {
            let mut items = items.lock();
            for (handle, value) in handles.into_iter().zip(values) {
                // Unsubscribed while the poll was running.
                let Some(item) = items.get_mut(&handle) else {
                    continue;
                };
                let text = format!("{}|{}", value.value, value.status);
                if config.old_new && item.last.as_deref() == Some(text.as_str()) {
                    continue;
                }
                item.last = Some(text);
                changed.push((item.callback.clone(), value));
            }
        }

        for (callback, value) in changed {
            callback(value);
        }
    }
}

#[async_trait]
impl<C: ProtocolClient> ProtocolClient for Polled<C> {
    async fn connect(&self) -> ClientResult<()> {
        self.inner.connect().await?;
        self.start();
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.stop();
        self.items.lock().clear();
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            subscribe: self.config.enabled(),
            ..self.inner.capabilities()
        }
    }

    async fn browse_children(
        &self,
        node: &str,
        direction: BrowseDirection,
    ) -> ClientResult<Vec<BrowseNode>> {
        self.inner.browse_children(node, direction).await
    }

    async fn read_values(&self, addresses: &[String]) -> ClientResult<Vec<DataValue>> {
        self.inner.read_values(addresses).await
    }

    async fn write_values(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        self.inner.write_values(values).await
    }

    async fn subscribe(
        &self,
        requests: Vec<MonitorRequest>,
    ) -> ClientResult<Vec<ClientResult<ItemHandle>>> {
        if !self.config.enabled() {
            return Err(ClientError::Unsupported("subscribe"));
        }
        if !self.inner.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut items = self.items.lock();
        Ok(requests
            .into_iter()
            .map(|request| {
                let handle = ItemHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
                items.insert(
                    handle,
                    PolledItem {
                        address: request.address,
                        callback: request.on_change,
                        last: None,
                    },
                );
                Ok(handle)
            })
            .collect())
    }

    async fn unsubscribe(&self, handles: &[ItemHandle]) -> ClientResult<()> {
        let mut items = self.items.lock();
        for handle in handles {
            items.remove(handle);
        }
        Ok(())
    }
}

/// Wraps every client of an inner factory in [`Polled`].
pub struct PolledFactory<C> {
    inner: Arc<dyn ClientFactory<C>>,
    config: PollingConfig,
}

impl<C: ProtocolClient> PolledFactory<C> {
    pub fn new(inner: Arc<dyn ClientFactory<C>>, config: PollingConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<C: ProtocolClient> ClientFactory<Polled<C>> for PolledFactory<C> {
    async fn create(&self) -> ClientResult<Arc<Polled<C>>> {
        let client = self.inner.create().await?;
        Ok(Arc::new(Polled::new(client, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use fieldgate_driver_framework::{MonitoringConfig, Variant};

    /// Reports the same value until `value` changes.
    struct Counter {
        value: AtomicU64,
        reads: AtomicUsize,
        connected: AtomicBool,
    }

    #[async_trait]
    impl ProtocolClient for Counter {
        async fn connect(&self) -> ClientResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> ClientResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                read: true,
                ..Default::default()
            }
        }

        async fn read_values(&self, addresses: &[String]) -> ClientResult<Vec<DataValue>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let value = self.value.load(Ordering::SeqCst);
            Ok(addresses.iter().map(|_| DataValue::good(Variant::UInt(value))).collect())
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            value: AtomicU64::new(1),
            reads: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
        })
    }

    fn config(old_new: bool) -> PollingConfig {
        PollingConfig {
            time_ms: 10,
            timeout_ms: None,
            old_new,
        }
    }

    async fn subscribe(polled: &Polled<Counter>) -> Arc<Mutex<Vec<Variant>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handles = polled
            .subscribe(vec![MonitorRequest {
                address: "holding-register:0".into(),
                parameters: MonitoringConfig::default(),
                on_change: Arc::new(move |v: DataValue| sink.lock().push(v.value)),
            }])
            .await
            .unwrap();
        assert!(handles[0].is_ok());
        seen
    }

    #[tokio::test]
    async fn test_every_poll_reported_without_old_new() {
        let inner = counter();
        let polled = Polled::new(inner.clone(), config(false));
        polled.connect().await.unwrap();
        let seen = subscribe(&polled).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(seen.lock().len() >= 3);
    }

    #[tokio::test]
    async fn test_old_new_suppresses_repeats() {
        let inner = counter();
        let polled = Polled::new(inner.clone(), config(true));
        polled.connect().await.unwrap();
        let seen = subscribe(&polled).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        inner.value.store(2, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(inner.reads.load(Ordering::SeqCst) >= 4);
        assert_eq!(*seen.lock(), vec![Variant::UInt(1), Variant::UInt(2)]);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_disconnect_stop_polling() {
        let inner = counter();
        let polled = Polled::new(inner.clone(), config(false));
        polled.connect().await.unwrap();
        subscribe(&polled).await;
        assert_eq!(polled.item_count(), 1);

        polled.disconnect().await.unwrap();
        assert_eq!(polled.item_count(), 0);
        let reads = inner.reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inner.reads.load(Ordering::SeqCst), reads);
    }

    #[tokio::test]
    async fn test_disabled_polling_cannot_subscribe() {
        let polled = Polled::new(
            counter(),
            PollingConfig {
                time_ms: 0,
                timeout_ms: None,
                old_new: false,
            },
        );
        polled.connect().await.unwrap();
        assert!(!polled.capabilities().subscribe);
        assert!(matches!(
            polled.subscribe(Vec::new()).await,
            Err(ClientError::Unsupported(_))
        ));
    }
}
