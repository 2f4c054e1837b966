//! Fieldgate driver for OPC-UA servers.
//!
//! Monitored node values are published as
//!
//! ```text
//! fieldgate/opc/<id>/values/<topic>
//! ```
//!
//! and requests are served on `fieldgate/opc/<id>/request/<op>`.
//!
//! Node ids use the standard text syntax (`ns=2;s=Line1.Temperature`, `i=2258`).
//! Path topics browse from a standard folder: `opc/<id>/path/Objects/Line1/+/Temperature`.

pub mod client;
pub mod coerce;
pub mod config;
pub mod driver;
pub mod node_id;
pub mod sim;

pub use client::OpcUaClient;
pub use coerce::DataType;
pub use config::{OpcUaBridgeConfig, OpcUaConfig, SimVariableConfig, SimulationConfig};
pub use driver::OpcUaDriver;
pub use node_id::NodeId;
pub use sim::{AddressSpace, SimClient, SimClientFactory};
