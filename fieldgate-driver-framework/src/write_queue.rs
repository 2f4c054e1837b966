//! Bounded write queue that coalesces single writes into batch writes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use fieldgate_common::{StatusCode, Variant};

use crate::client::{ClientResult, ProtocolClient, WriteValue};
use crate::config::WriteQueueConfig;
use crate::health::DriverHealth;
use crate::lifecycle::Lifecycle;

/// Target of batched writes.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    /// Write all values in one call; one status per value, in order.
    async fn write_batch(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>>;
}

#[async_trait]
impl<C: ProtocolClient> BatchWriter for Lifecycle<C> {
    async fn write_batch(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        self.connected_client()?.write_values(values).await
    }
}

struct WriteRequest {
    value: WriteValue,
    done: oneshot::Sender<bool>,
}

/// Producer side of the write pipeline.
///
/// Every accepted request is completed exactly once. A full queue rejects
/// immediately; rejections are counted and reported with the next accepted
/// write instead of being logged one by one.
pub struct WriteQueue {
    tx: mpsc::Sender<WriteRequest>,
    missed: AtomicU64,
    with_time: bool,
    health: Arc<DriverHealth>,
}

impl WriteQueue {
    /// Create the queue and spawn its consumer.
    pub fn start(
        writer: Arc<dyn BatchWriter>,
        config: &WriteQueueConfig,
        health: Arc<DriverHealth>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let consumer = Consumer {
            rx,
            writer,
            block_size: config.block_size.max(1),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms.max(1)),
            write_timeout: Duration::from_millis(config.timeout_ms),
            health: health.clone(),
        };
        let handle = tokio::spawn(consumer.run(shutdown));

        let queue = Arc::new(Self {
            tx,
            missed: AtomicU64::new(0),
            with_time: config.with_time,
            health,
        });
        (queue, handle)
    }

    /// Queue a write. The request is queued (or rejected) before this returns;
    /// the future resolves to the outcome.
    pub fn enqueue(
        &self,
        address: impl Into<String>,
        value: Variant,
    ) -> impl Future<Output = bool> + Send + 'static {
        let mut write = WriteValue::new(address, value);
        if self.with_time {
            write.source_time = Some(Utc::now());
        }

        let (done, outcome) = oneshot::channel();
        let accepted = match self.tx.try_send(WriteRequest { value: write, done }) {
            Ok(()) => {
                let missed = self.missed.swap(0, Ordering::Relaxed);
                if missed > 0 {
                    tracing::warn!(missed, "Write queue accepting again after rejected writes");
                }
                true
            }
            Err(TrySendError::Full(request)) => {
                if self.missed.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!(address = %request.value.address, "Write queue full, rejecting writes");
                }
                self.health.record_write_missed();
                false
            }
            Err(TrySendError::Closed(request)) => {
                tracing::warn!(address = %request.value.address, "Write queue closed");
                false
            }
        };

        async move { accepted && outcome.await.unwrap_or(false) }
    }

    /// Writes rejected since the last accepted one.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

struct Consumer {
    rx: mpsc::Receiver<WriteRequest>,
    writer: Arc<dyn BatchWriter>,
    block_size: usize,
    poll_timeout: Duration,
    write_timeout: Duration,
    health: Arc<DriverHealth>,
}

impl Consumer {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = tokio::time::timeout(self.poll_timeout, self.rx.recv()) => match received {
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(request)) => request,
                },
            };

            let mut batch = Vec::with_capacity(self.block_size);
            batch.push(first);
            while batch.len() < self.block_size {
                match self.rx.try_recv() {
                    Ok(request) => batch.push(request),
                    Err(_) => break,
                }
            }

            self.flush(batch).await;
        }

        self.rx.close();
        let mut abandoned = 0;
        while let Ok(request) = self.rx.try_recv() {
            let _ = request.done.send(false);
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!(abandoned, "Write queue stopped with pending writes");
        }
    }

    async fn flush(&self, batch: Vec<WriteRequest>) {
        let values: Vec<WriteValue> = batch.iter().map(|r| r.value.clone()).collect();
        let outcome = tokio::time::timeout(self.write_timeout, self.writer.write_batch(&values)).await;

        let statuses = match outcome {
            Ok(Ok(statuses)) if statuses.len() == batch.len() => statuses,
            Ok(Ok(statuses)) => {
                tracing::warn!(
                    expected = batch.len(),
                    received = statuses.len(),
                    "Batch write returned a wrong number of results"
                );
                vec![StatusCode::BAD_UNEXPECTED_ERROR; batch.len()]
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, count = batch.len(), "Batch write failed");
                vec![e.status(); batch.len()]
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    count = batch.len(),
                    "Batch write timed out"
                );
                vec![StatusCode::BAD_TIMEOUT; batch.len()]
            }
        };

        for (request, status) in batch.into_iter().zip(statuses) {
            let ok = status.is_good();
            if !ok {
                tracing::debug!(address = %request.value.address, status = %status, "Write rejected");
            }
            self.health.record_write(ok);
            let _ = request.done.send(ok);
        }
    }
}
