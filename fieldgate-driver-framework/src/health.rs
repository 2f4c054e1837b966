//! Driver health counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::lifecycle::DriverState;
use crate::publisher::Publisher;

/// Counters updated by the runtime components of one driver.
#[derive(Debug)]
pub struct DriverHealth {
    driver: String,
    start_time: Instant,
    values_published: AtomicU64,
    values_dropped: AtomicU64,
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
    writes_missed: AtomicU64,
    connects: AtomicU64,
    reconnects: AtomicU64,
}

/// Health snapshot for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub driver: String,
    pub status: String,
    pub state: DriverState,
    pub uptime_secs: u64,
    pub values_published: u64,
    pub values_dropped: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub writes_missed: u64,
    pub connects: u64,
    pub reconnects: u64,
}

impl DriverHealth {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            start_time: Instant::now(),
            values_published: AtomicU64::new(0),
            values_dropped: AtomicU64::new(0),
            writes_succeeded: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            writes_missed: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn record_published(&self) {
        self.values_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.values_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, ok: bool) {
        if ok {
            self.writes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_write_missed(&self) {
        self.writes_missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, state: DriverState) -> HealthSnapshot {
        let writes_failed = self.writes_failed.load(Ordering::Relaxed);
        let writes_missed = self.writes_missed.load(Ordering::Relaxed);

        let status = match state {
            DriverState::Connected if writes_failed == 0 && writes_missed == 0 => "healthy",
            DriverState::Connected => "degraded",
            DriverState::Connecting | DriverState::Disconnected => "unavailable",
            DriverState::Failed => "error",
        };

        HealthSnapshot {
            driver: self.driver.clone(),
            status: status.to_string(),
            state,
            uptime_secs: self.start_time.elapsed().as_secs(),
            values_published: self.values_published.load(Ordering::Relaxed),
            values_dropped: self.values_dropped.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed,
            writes_missed,
            connects: self.connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publish a snapshot to `<driver key>/@/health`.
    pub async fn publish(&self, publisher: &Publisher, state: DriverState) -> Result<()> {
        let key = publisher.keys().health_key();
        publisher.publish_json(&key, &self.snapshot(state)).await
    }
}
