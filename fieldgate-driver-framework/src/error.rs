//! Error types for the driver framework.

use fieldgate_common::TopicError;
use thiserror::Error;

use crate::client::ClientError;

/// Result type alias using [`DriverError`].
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur in a driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    #[error("Protocol client error: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("Driver is shutting down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DriverError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Wrap an error with context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<zenoh::Error> for DriverError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for DriverError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<fieldgate_common::Error> for DriverError {
    fn from(err: fieldgate_common::Error) -> Self {
        match err {
            fieldgate_common::Error::Config(msg) => Self::Config(msg),
            fieldgate_common::Error::Topic(e) => Self::Topic(e),
            other => Self::with_context("fieldgate", other),
        }
    }
}
