//! Configuration for the PLC driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fieldgate_driver_framework::{
    DriverConfig, DriverError, LoggingConfig, Result, RetryConfig, ZenohConfig,
};

/// Complete driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// PLC connection settings
    pub plc: PlcConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// PLC connection and driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Driver instance id
    pub id: String,

    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read request timeout in milliseconds (default: 100)
    #[serde(default = "default_request_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Write request timeout in milliseconds (default: 100)
    #[serde(default = "default_request_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Polling of subscribed items
    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Values buffered between the device and zenoh (default: 1024)
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,

    /// Topics subscribed at startup
    #[serde(default)]
    pub topics: Vec<String>,

    /// Health publication interval in seconds (default: 30)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    100
}

fn default_publish_buffer() -> usize {
    1024
}

fn default_health_interval() -> u64 {
    30
}

impl PlcConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    /// In-process register bank
    Memory {
        /// Size of each data area (default: 1024)
        #[serde(default = "default_memory_size")]
        size: u16,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_memory_size() -> u16 {
    1024
}

impl ConnectionConfig {
    /// Short description for logs and the info request.
    pub fn describe(&self) -> String {
        match self {
            ConnectionConfig::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            } => format!("rtu://{}@{}", port, baud_rate),
            ConnectionConfig::Memory { size } => format!("memory://{}", size),
        }
    }
}

/// Polling of items for devices without native subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Poll period in milliseconds; 0 disables subscriptions
    #[serde(default = "default_polling_time_ms")]
    pub time_ms: u64,

    /// Timeout of one poll in milliseconds (default: the poll period)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Only report values that changed since the previous poll
    #[serde(default)]
    pub old_new: bool,
}

fn default_polling_time_ms() -> u64 {
    1000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            time_ms: default_polling_time_ms(),
            timeout_ms: None,
            old_new: false,
        }
    }
}

impl PollingConfig {
    pub fn enabled(&self) -> bool {
        self.time_ms > 0
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.time_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(self.time_ms).max(1))
    }
}

impl DriverConfig for PlcBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn driver_id(&self) -> &str {
        &self.plc.id
    }

    fn set_driver_id(&mut self, id: String) {
        self.plc.id = id;
    }

    fn health_interval(&self) -> Duration {
        Duration::from_secs(self.plc.health_interval_secs)
    }

    fn initial_topics(&self) -> &[String] {
        &self.plc.topics
    }

    fn validate(&self) -> Result<()> {
        let plc = &self.plc;
        if plc.id.is_empty() {
            return Err(DriverError::validation("plc.id must not be empty"));
        }
        if plc.unit_id == 0 || plc.unit_id > 247 {
            return Err(DriverError::validation(format!(
                "plc.unit_id must be 1-247, got {}",
                plc.unit_id
            )));
        }
        if plc.read_timeout_ms == 0 || plc.write_timeout_ms == 0 {
            return Err(DriverError::validation("plc request timeouts must be > 0"));
        }

        match &plc.connection {
            ConnectionConfig::Tcp { host, .. } if host.is_empty() => {
                return Err(DriverError::validation("plc.connection.host must not be empty"));
            }
            ConnectionConfig::Rtu {
                parity,
                data_bits,
                stop_bits,
                ..
            } => {
                if !matches!(parity.to_lowercase().as_str(), "none" | "even" | "odd") {
                    return Err(DriverError::validation(format!(
                        "invalid parity '{}' (expected none, even or odd)",
                        parity
                    )));
                }
                if !(5..=8).contains(data_bits) {
                    return Err(DriverError::validation(format!(
                        "invalid data_bits {} (expected 5-8)",
                        data_bits
                    )));
                }
                if !matches!(stop_bits, 1 | 2) {
                    return Err(DriverError::validation(format!(
                        "invalid stop_bits {} (expected 1 or 2)",
                        stop_bits
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_config() {
        let config = PlcBridgeConfig::from_json5(
            r#"{
                zenoh: { mode: "peer" },
                plc: {
                    id: "press",
                    connection: { type: "tcp", host: "192.168.1.10" },
                    unit_id: 3,
                    topics: ["plc/press/node/holding-register:0"],
                },
            }"#,
        )
        .unwrap();

        assert_eq!(config.driver_id(), "press");
        assert_eq!(config.plc.unit_id, 3);
        assert_eq!(config.plc.read_timeout(), Duration::from_millis(100));
        assert_eq!(config.plc.write_timeout(), Duration::from_millis(100));
        assert_eq!(config.plc.connection.describe(), "tcp://192.168.1.10:502");
        assert!(config.plc.polling.enabled());
        assert_eq!(config.plc.polling.timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_parse_rtu_config() {
        let config = PlcBridgeConfig::from_json5(
            r#"{
                plc: {
                    id: "meter",
                    connection: {
                        type: "rtu",
                        port: "/dev/ttyUSB0",
                        baud_rate: 19200,
                        parity: "even",
                    },
                    polling: { time_ms: 250, timeout_ms: 100, old_new: true },
                },
            }"#,
        )
        .unwrap();

        match &config.plc.connection {
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                assert_eq!(port, "/dev/ttyUSB0");
                assert_eq!(*baud_rate, 19200);
                assert_eq!(*data_bits, 8);
                assert_eq!(parity, "even");
                assert_eq!(*stop_bits, 1);
            }
            other => panic!("Expected RTU connection, got {:?}", other),
        }
        assert!(config.plc.polling.old_new);
        assert_eq!(config.plc.polling.timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_validate_unit_id() {
        let err = PlcBridgeConfig::from_json5(
            r#"{ plc: { id: "x", connection: { type: "memory" }, unit_id: 0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::ConfigValidation(_)));
    }

    #[test]
    fn test_validate_parity() {
        let err = PlcBridgeConfig::from_json5(
            r#"{ plc: { id: "x", connection: { type: "rtu", port: "COM1", parity: "mark" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::ConfigValidation(_)));
    }

    #[test]
    fn test_polling_disabled() {
        let config = PlcBridgeConfig::from_json5(
            r#"{ plc: { id: "x", connection: { type: "memory", size: 16 }, polling: { time_ms: 0 } } }"#,
        )
        .unwrap();
        assert!(!config.plc.polling.enabled());
    }
}
