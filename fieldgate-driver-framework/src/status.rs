//! Driver status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::lifecycle::DriverState;
use crate::publisher::Publisher;

/// Driver status information, published on `<driver key>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStatus {
    /// Driver instance id.
    pub driver: String,
    /// Protocol, e.g. "opc" or "plc".
    pub system: String,
    pub version: String,
    /// "running", "offline" or "error".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DriverState>,
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl DriverStatus {
    fn new(driver: &str, system: &str, version: &str, status: &str) -> Self {
        Self {
            driver: driver.to_string(),
            system: system.to_string(),
            version: version.to_string(),
            status: status.to_string(),
            state: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn running(driver: &str, system: &str, version: &str) -> Self {
        Self::new(driver, system, version, "running")
    }

    pub fn offline(driver: &str, system: &str, version: &str) -> Self {
        Self::new(driver, system, version, "offline").with_state(DriverState::Disconnected)
    }

    pub fn error(driver: &str, system: &str, version: &str, error: impl Into<String>) -> Self {
        Self::new(driver, system, version, "error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    pub fn with_state(mut self, state: DriverState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = publisher.keys().status_key();
        publisher.publish_json(&key, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = DriverStatus::running("line1", "opc", "0.2.0");
        assert_eq!(status.driver, "line1");
        assert_eq!(status.status, "running");
        assert!(status.state.is_none());
    }

    #[test]
    fn test_offline_carries_state() {
        let status = DriverStatus::offline("press", "plc", "0.2.0");
        assert_eq!(status.state, Some(DriverState::Disconnected));
    }

    #[test]
    fn test_status_serialization() {
        let status = DriverStatus::running("d0", "dds", "1.0.0")
            .with_state(DriverState::Connected)
            .with_metadata(serde_json::json!({ "topics": 5 }));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["driver"], "d0");
        assert_eq!(json["status"], "running");
        assert_eq!(json["state"], "Connected");
        assert_eq!(json["topics"], 5);
    }

    #[test]
    fn test_error_status() {
        let status = DriverStatus::error("d0", "dds", "1.0.0", "domain unavailable");
        assert_eq!(status.metadata["error"], "domain unavailable");
    }
}
