//! Fieldgate Driver Framework
//!
//! The protocol-independent runtime shared by every Fieldgate driver.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ProtocolClient`] and [`ClientFactory`], the seam to a protocol stack
//! - [`Lifecycle`] for connecting, retrying and supervising a client
//! - [`AddressResolver`] for resolving wildcard paths by browsing, with a keyed cache
//! - [`MonitoredItemRegistry`] for native subscription bookkeeping
//! - [`WriteQueue`] for bounded, batched writes
//! - [`ValuePipeline`] for normalizing values and publishing them in order
//! - [`DriverCore`], which ties the above together for a protocol driver
//! - [`DriverRunner`] and [`DriverService`] for running a driver on zenoh
//!
//! # Example
//!
//! ```ignore
//! use fieldgate_driver_framework::{SystemType, run_driver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_driver::<MyConfig, _>("mydriver", SystemType::Plc, "mydriver.json5", |config, bus| {
//!         Ok(MyDriver::new(config, bus)?)
//!     })
//!     .await
//! }
//! ```

mod args;
mod browse;
mod client;
mod config;
mod driver;
mod driver_core;
mod error;
mod handlers;
mod health;
mod lifecycle;
mod pipeline;
mod publisher;
mod registry;
mod resolver;
mod runner;
mod service;
mod status;
mod write_queue;

pub use args::DriverArgs;
pub use browse::{BrowseEntry, BrowseRequest, browse_tree};
pub use client::{
    BrowseDirection, BrowseNode, Capabilities, ClientError, ClientFactory, ClientResult,
    ItemHandle, MonitorRequest, NodeClass, ProtocolClient, ValueCallback, WriteValue,
};
pub use config::{
    AddressCacheConfig, DataChangeTrigger, DriverConfig, MonitoringConfig, RetryConfig,
    WriteQueueConfig,
};
pub use driver::{BrowseQuery, Driver};
pub use driver_core::{CoreOptions, DriverCore, ValueMapper};
pub use error::{DriverError, Result};
pub use handlers::RequestHandler;
pub use health::{DriverHealth, HealthSnapshot};
pub use lifecycle::{DriverState, Lifecycle, ReconnectHandler, RetryPolicy};
pub use pipeline::{Bus, MemoryBus, ValuePipeline, normalize};
pub use publisher::Publisher;
pub use registry::MonitoredItemRegistry;
pub use resolver::{AddressResolver, BrowseSource, RootMap};
pub use runner::{DriverRunner, run_driver};
pub use service::DriverService;
pub use status::DriverStatus;
pub use write_queue::{BatchWriter, WriteQueue};

// Re-export commonly used types from fieldgate-common
pub use fieldgate_common::{
    CanonicalValue, DataValue, KeyExprBuilder, LoggingConfig, OutputFormat, RequestOp,
    StatusCode, SystemType, Topic, TopicType, Variant, ZenohConfig,
};
