//! Configuration for the OPC-UA driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fieldgate_driver_framework::{
    AddressCacheConfig, DriverConfig, DriverError, LoggingConfig, MonitoringConfig, Result,
    RetryConfig, WriteQueueConfig, ZenohConfig,
};

use crate::coerce::DataType;

/// Complete driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaBridgeConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// OPC-UA connection settings.
    pub opcua: OpcUaConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OPC-UA server connection and driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Driver instance id.
    pub id: String,

    /// Server endpoint. `sim://<name>` selects the built-in simulated server.
    pub endpoint: String,

    /// Timeout for reads, writes and browses (default: 5000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Monitored item parameters.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub write_queue: WriteQueueConfig,

    /// Cache for browse path resolution.
    #[serde(default)]
    pub address_cache: AddressCacheConfig,

    /// Values buffered between the server and zenoh (default: 1024).
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,

    /// Topics subscribed at startup.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Health publication interval in seconds (default: 30).
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Variables of the simulated server.
    #[serde(default)]
    pub simulation: SimulationConfig,
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

impl OpcUaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Name of the simulated server the endpoint points at, if any.
    pub fn simulated_server(&self) -> Option<&str> {
        self.endpoint.strip_prefix("sim://")
    }
}

/// Address space of the simulated server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Namespace index of the generated node ids (default: 2).
    #[serde(default = "default_namespace")]
    pub namespace: u16,

    #[serde(default)]
    pub variables: Vec<SimVariableConfig>,
}

fn default_namespace() -> u16 {
    2
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            variables: Vec::new(),
        }
    }
}

/// One simulated variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimVariableConfig {
    /// Slash separated path below Objects, e.g. `Plant/Line1/Temperature`.
    pub path: String,

    pub data_type: DataType,

    /// Initial value.
    #[serde(default)]
    pub value: serde_json::Value,

    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl DriverConfig for OpcUaBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn driver_id(&self) -> &str {
        &self.opcua.id
    }

    fn set_driver_id(&mut self, id: String) {
        self.opcua.id = id;
    }

    fn health_interval(&self) -> Duration {
        Duration::from_secs(self.opcua.health_interval_secs)
    }

    fn initial_topics(&self) -> &[String] {
        &self.opcua.topics
    }

    fn validate(&self) -> Result<()> {
        if self.opcua.id.is_empty() {
            return Err(DriverError::validation("opcua.id must not be empty"));
        }
        if self.opcua.endpoint.is_empty() {
            return Err(DriverError::validation("opcua.endpoint must not be empty"));
        }
        if self.opcua.request_timeout_ms == 0 {
            return Err(DriverError::validation("opcua.request_timeout_ms must be > 0"));
        }
        if self.opcua.write_queue.block_size == 0 {
            return Err(DriverError::validation("opcua.write_queue.block_size must be > 0"));
        }
        Ok(())
    }
}
