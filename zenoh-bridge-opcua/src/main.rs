//! Fieldgate driver for OPC-UA servers.

use std::sync::Arc;

use anyhow::Result;
use fieldgate_driver_framework::{ClientFactory, Driver, DriverError, SystemType, run_driver};

use zenoh_bridge_opcua::{AddressSpace, OpcUaBridgeConfig, OpcUaDriver, SimClient, SimClientFactory};

#[tokio::main]
async fn main() -> Result<()> {
    run_driver::<OpcUaBridgeConfig, _>(
        "opcua",
        SystemType::OpcUa,
        "opcua.json5",
        |config, bus| {
            let opcua = &config.opcua;

            // Only the simulated transport is built in.
            let Some(server) = opcua.simulated_server() else {
                return Err(DriverError::config(format!(
                    "no OPC-UA transport for endpoint '{}'",
                    opcua.endpoint
                )));
            };
            let space = Arc::new(AddressSpace::from_config(server, &opcua.simulation)?);
            tracing::info!(
                server = %server,
                variables = opcua.simulation.variables.len(),
                "Serving simulated OPC-UA server"
            );

            let factory: Arc<dyn ClientFactory<SimClient>> =
                Arc::new(SimClientFactory::new(&opcua.endpoint, space));
            let driver: Arc<dyn Driver> = Arc::new(OpcUaDriver::new(opcua, factory, bus));
            Ok(driver)
        },
    )
    .await
}
