//! Fieldgate driver for PLCs speaking Modbus TCP or RTU.
//!
//! Polled item values are published as
//!
//! ```text
//! fieldgate/plc/<id>/values/<topic>
//! ```
//!
//! and requests are served on `fieldgate/plc/<id>/request/<op>`.
//!
//! Items are addressed as `<area>:<index>[<count>][:<format>]`, for example
//! `holding-register:100:f32` or `coil:12`. See [`address`].

pub mod address;
pub mod client;
pub mod config;
pub mod driver;
pub mod memory;
pub mod modbus;
pub mod polling;

pub use address::{Area, PlcAddress, RegisterFormat};
pub use client::{PlcClient, PlcClientFactory, RegisterIo};
pub use config::{ConnectionConfig, PlcBridgeConfig, PlcConfig, PollingConfig};
pub use driver::{PlcDriver, RegisterDriver};
pub use memory::MemoryRegisters;
pub use modbus::ModbusIo;
pub use polling::{Polled, PolledFactory};
