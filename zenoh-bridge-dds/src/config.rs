//! Configuration for the DDS driver.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fieldgate_driver_framework::{
    DriverConfig, DriverError, LoggingConfig, Result, RetryConfig, ZenohConfig,
};

/// Complete driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdsBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// DDS domain settings
    pub dds: DdsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdsConfig {
    /// Driver instance id
    pub id: String,

    /// DDS domain id (default: 0)
    #[serde(default)]
    pub domain: u32,

    /// Type ids usable in topic addresses
    #[serde(default)]
    pub topic_types: Vec<TopicTypeConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout of sample writes in milliseconds (default: 5000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Samples buffered between the domain and zenoh (default: 1024)
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,

    /// Topics subscribed at startup
    #[serde(default)]
    pub topics: Vec<String>,

    /// Health publication interval in seconds (default: 30)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

/// Binds a type id used in addresses to a registered type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTypeConfig {
    pub id: String,
    pub type_name: String,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_publish_buffer() -> usize {
    1024
}

fn default_health_interval() -> u64 {
    30
}

impl DdsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl DriverConfig for DdsBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn driver_id(&self) -> &str {
        &self.dds.id
    }

    fn set_driver_id(&mut self, id: String) {
        self.dds.id = id;
    }

    fn health_interval(&self) -> Duration {
        Duration::from_secs(self.dds.health_interval_secs)
    }

    fn initial_topics(&self) -> &[String] {
        &self.dds.topics
    }

    fn validate(&self) -> Result<()> {
        let dds = &self.dds;
        if dds.id.is_empty() {
            return Err(DriverError::validation("dds.id must not be empty"));
        }
        if dds.request_timeout_ms == 0 {
            return Err(DriverError::validation("dds.request_timeout_ms must be > 0"));
        }

        let mut seen = HashSet::new();
        for topic_type in &dds.topic_types {
            if topic_type.id.is_empty() || topic_type.id.contains('/') {
                return Err(DriverError::validation(format!(
                    "invalid topic type id '{}'",
                    topic_type.id
                )));
            }
            if !seen.insert(topic_type.id.as_str()) {
                return Err(DriverError::validation(format!(
                    "duplicate topic type id '{}'",
                    topic_type.id
                )));
            }
        }
        Ok(())
    }
}
