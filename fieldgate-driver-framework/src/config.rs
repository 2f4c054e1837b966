//! Configuration traits and the settings shared by all drivers.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fieldgate_common::{KEY_PREFIX, LoggingConfig, ZenohConfig};

use crate::error::{DriverError, Result};

/// Trait for driver configuration types.
///
/// Implement this for a driver's configuration struct to get loading,
/// validation, and access to the common sections.
pub trait DriverConfig: Sized + DeserializeOwned {
    fn zenoh(&self) -> &ZenohConfig;

    fn logging(&self) -> &LoggingConfig;

    /// Driver instance id, used in topics and key expressions.
    fn driver_id(&self) -> &str;

    /// Override the driver instance id (from the command line).
    fn set_driver_id(&mut self, id: String);

    /// Key expression prefix.
    fn key_prefix(&self) -> &str {
        KEY_PREFIX
    }

    /// Interval between health publications.
    fn health_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Topics subscribed once the driver is started.
    fn initial_topics(&self) -> &[String] {
        &[]
    }

    /// Called after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a JSON5 file and validate it.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DriverError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate configuration from JSON5 text.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection retry and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay between connection attempts.
    #[serde(default = "default_retry_wait_ms")]
    pub wait_ms: u64,

    /// Upper bound for the delay when `exponential` is set.
    #[serde(default = "default_retry_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default)]
    pub exponential: bool,

    /// How often the supervisor checks the live connection.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_retry_wait_ms() -> u64 {
    5000
}

fn default_retry_max_wait_ms() -> u64 {
    60_000
}

fn default_check_interval_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_retry_wait_ms(),
            max_wait_ms: default_retry_max_wait_ms(),
            exponential: false,
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl RetryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

/// When a monitored item reports a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChangeTrigger {
    Status,
    StatusValue,
    #[default]
    StatusValueTimestamp,
}

/// Parameters for native monitored items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Server-side queue size per item.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,

    /// Sampling interval in milliseconds; 0 lets the server pick its fastest rate.
    #[serde(default)]
    pub sampling_interval_ms: f64,

    #[serde(default)]
    pub discard_oldest: bool,

    #[serde(default)]
    pub data_change_trigger: DataChangeTrigger,
}

fn default_buffer_size() -> u32 {
    100
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            sampling_interval_ms: 0.0,
            discard_oldest: false,
            data_change_trigger: DataChangeTrigger::default(),
        }
    }
}

/// Write queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteQueueConfig {
    /// Maximum number of pending writes.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum number of writes per protocol call.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Stamp each write with the time it was enqueued.
    #[serde(default)]
    pub with_time: bool,

    /// Time allowed for one batch write.
    #[serde(default = "default_write_timeout_ms")]
    pub timeout_ms: u64,

    /// How long the consumer waits for the first item of a batch.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_queue_size() -> usize {
    1000
}

fn default_block_size() -> usize {
    100
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            block_size: default_block_size(),
            with_time: false,
            timeout_ms: default_write_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Address resolution cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressCacheConfig {
    #[serde(default = "default_cache_size")]
    pub maximum_size: u64,

    /// Entries idle longer than this are evicted.
    #[serde(default = "default_cache_expiry")]
    pub expire_after_seconds: u64,
}

fn default_cache_size() -> u64 {
    1000
}

fn default_cache_expiry() -> u64 {
    60
}

impl Default for AddressCacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: default_cache_size(),
            expire_after_seconds: default_cache_expiry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Settings {
        #[serde(default)]
        retry: RetryConfig,
        #[serde(default)]
        monitoring: MonitoringConfig,
        #[serde(default)]
        write_queue: WriteQueueConfig,
        #[serde(default)]
        address_cache: AddressCacheConfig,
    }

    #[test]
    fn test_defaults() {
        let settings: Settings = json5::from_str("{}").unwrap();

        assert_eq!(settings.retry.wait_ms, 5000);
        assert!(!settings.retry.exponential);
        assert_eq!(settings.retry.check_interval(), Duration::from_secs(1));
        assert_eq!(settings.monitoring.buffer_size, 100);
        assert_eq!(settings.monitoring.sampling_interval_ms, 0.0);
        assert_eq!(
            settings.monitoring.data_change_trigger,
            DataChangeTrigger::StatusValueTimestamp
        );
        assert_eq!(settings.write_queue.queue_size, 1000);
        assert_eq!(settings.write_queue.block_size, 100);
        assert!(!settings.write_queue.with_time);
        assert_eq!(settings.address_cache.maximum_size, 1000);
        assert_eq!(settings.address_cache.expire_after_seconds, 60);
    }

    #[test]
    fn test_overrides() {
        let settings: Settings = json5::from_str(
            r#"{
                retry: { wait_ms: 250, exponential: true },
                monitoring: { sampling_interval_ms: 500, data_change_trigger: "StatusValue" },
                write_queue: { queue_size: 10, block_size: 2, with_time: true },
                address_cache: { maximum_size: 5, expire_after_seconds: 1 },
            }"#,
        )
        .unwrap();

        assert_eq!(settings.retry.wait_ms, 250);
        assert!(settings.retry.exponential);
        assert_eq!(settings.monitoring.sampling_interval_ms, 500.0);
        assert_eq!(
            settings.monitoring.data_change_trigger,
            DataChangeTrigger::StatusValue
        );
        assert_eq!(settings.write_queue.queue_size, 10);
        assert!(settings.write_queue.with_time);
        assert_eq!(settings.address_cache.maximum_size, 5);
    }
}
