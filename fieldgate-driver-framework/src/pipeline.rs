//! Value normalization and the publish pipeline onto the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use fieldgate_common::{CanonicalValue, DataValue, Topic, encode_value};

use crate::error::Result;
use crate::health::DriverHealth;

/// Publish side of the message bus.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Fire-and-forget publish of `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;
}

/// Convert a protocol value into the canonical representation.
///
/// Missing timestamps fall back to the server time, then to `received`.
pub fn normalize(value: DataValue, received: DateTime<Utc>) -> CanonicalValue {
    let server_time = value.server_time.unwrap_or(received);
    CanonicalValue {
        value: value.value,
        status_code: value.status,
        source_time: value.source_time.unwrap_or(server_time),
        server_time,
    }
}

/// Ordered, non-blocking hand-off from client callbacks to the bus.
///
/// Values are published by a single task in submission order. When the
/// buffer is full new values are dropped and counted.
#[derive(Clone)]
pub struct ValuePipeline {
    tx: mpsc::Sender<(Topic, CanonicalValue)>,
    health: Arc<DriverHealth>,
}

impl ValuePipeline {
    pub fn start(
        bus: Arc<dyn Bus>,
        capacity: usize,
        health: Arc<DriverHealth>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(Topic, CanonicalValue)>(capacity.max(1));
        let task_health = health.clone();

        let handle = tokio::spawn(async move {
            loop {
                let (topic, value) = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    next = rx.recv() => match next {
                        Some(next) => next,
                        None => break,
                    },
                };

                let payload = match encode_value(&topic, &value) {
                    Ok(Some(payload)) => payload,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(topic = %topic.topic_name, error = %e, "Failed to encode value");
                        continue;
                    }
                };

                match bus.publish(&topic.topic_name, payload).await {
                    Ok(()) => task_health.record_published(),
                    Err(e) => {
                        tracing::warn!(topic = %topic.topic_name, error = %e, "Failed to publish value")
                    }
                }
            }
        });

        (Self { tx, health }, handle)
    }

    /// Queue an already normalized value.
    pub fn publish(&self, topic: Topic, value: CanonicalValue) {
        match self.tx.try_send((topic, value)) {
            Ok(()) => {}
            Err(TrySendError::Full((topic, _))) => {
                tracing::debug!(topic = %topic.topic_name, "Publish buffer full, dropping value");
                self.health.record_dropped();
            }
            Err(TrySendError::Closed(_)) => self.health.record_dropped(),
        }
    }

    /// Normalize a protocol value and queue it.
    pub fn submit(&self, topic: &Topic, value: DataValue) {
        self.publish(topic.clone(), normalize(value, Utc::now()));
    }
}

/// In-process bus that records every publication.
#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    notify: Notify,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().clone()
    }

    /// Payloads published on `channel`, as UTF-8 text.
    pub fn texts(&self, channel: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` messages were published.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.messages.lock().push((channel.to_string(), payload));
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fieldgate_common::{StatusCode, Variant};

    fn start(bus: Arc<MemoryBus>, capacity: usize) -> (ValuePipeline, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (pipeline, _) =
            ValuePipeline::start(bus, capacity, Arc::new(DriverHealth::new("test")), shutdown_rx);
        (pipeline, shutdown_tx)
    }

    #[test]
    fn test_normalize_fills_timestamps() {
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let server = Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 59).unwrap();

        let bare = normalize(DataValue::good(1i64), received);
        assert_eq!(bare.server_time, received);
        assert_eq!(bare.source_time, received);

        let with_server = normalize(DataValue::good(1i64).with_server_time(server), received);
        assert_eq!(with_server.server_time, server);
        assert_eq!(with_server.source_time, server);

        let bad = normalize(DataValue::bad(StatusCode::BAD_TIMEOUT), received);
        assert_eq!(bad.status_code, StatusCode::BAD_TIMEOUT);
        assert!(bad.value.is_null());
    }

    #[tokio::test]
    async fn test_values_published_in_order() {
        let bus = Arc::new(MemoryBus::new());
        let (pipeline, _shutdown) = start(bus.clone(), 100);
        let topic = Topic::parse("plc/press/node/holding-register:1").unwrap();

        for i in 0..20 {
            pipeline.submit(&topic, DataValue::good(i as i64));
        }

        assert!(bus.wait_for(20, Duration::from_secs(1)).await);
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(bus.texts(&topic.topic_name), expected);
    }

    #[tokio::test]
    async fn test_json_format_publishes_envelope() {
        let bus = Arc::new(MemoryBus::new());
        let (pipeline, _shutdown) = start(bus.clone(), 10);
        let topic = Topic::parse("opc/srv/node:json/i=2258").unwrap();

        pipeline.submit(&topic, DataValue::good(Variant::from("2024-05-01")));

        assert!(bus.wait_for(1, Duration::from_secs(1)).await);
        let json: serde_json::Value = serde_json::from_str(&bus.texts(&topic.topic_name)[0]).unwrap();
        assert_eq!(json["Topic"]["Address"], "i=2258");
        assert_eq!(json["Value"]["Value"], "2024-05-01");
    }

    #[tokio::test]
    async fn test_overflow_drops_without_blocking() {
        let bus = Arc::new(MemoryBus::new());
        let health = Arc::new(DriverHealth::new("test"));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (pipeline, _) = ValuePipeline::start(bus.clone(), 2, health.clone(), shutdown_rx);
        let topic = Topic::parse("plc/press/node/coil:1").unwrap();

        // The publish task cannot run until this test yields.
        for _ in 0..5 {
            pipeline.submit(&topic, DataValue::good(true));
        }

        let snapshot = health.snapshot(crate::lifecycle::DriverState::Connected);
        assert_eq!(snapshot.values_dropped, 3);
        assert!(bus.wait_for(2, Duration::from_secs(1)).await);
    }
}
