//! Fieldgate Common Library
//!
//! Shared types and utilities for Fieldgate protocol drivers:
//!
//! - [`topic`] - Topic/address model (`Topic`, `SystemType`, `TopicType`, `OutputFormat`)
//! - [`value`] - Canonical value model (`Variant`, `StatusCode`, `DataValue`, `CanonicalValue`)
//! - [`serialization`] - Bus encoding of published values
//! - [`config`] - Zenoh and logging settings embedded in driver configs
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod topic;
pub mod value;

pub use config::{LogFormat, LoggingConfig, ZenohConfig};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder, RequestOp, sanitize_chunk};
pub use serialization::{Envelope, decode_payload, encode_value, topic_json, value_json};
pub use session::connect;
pub use topic::{OutputFormat, ResolvedAddress, SystemType, Topic, TopicError, TopicType};
pub use value::{CanonicalValue, DataValue, StatusCode, Variant, current_timestamp_millis};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
