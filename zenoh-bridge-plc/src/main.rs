//! Fieldgate driver for PLCs.

use std::sync::Arc;

use anyhow::Result;
use fieldgate_driver_framework::{Driver, SystemType, run_driver};

use zenoh_bridge_plc::{ConnectionConfig, MemoryRegisters, ModbusIo, PlcBridgeConfig, RegisterDriver};

#[tokio::main]
async fn main() -> Result<()> {
    run_driver::<PlcBridgeConfig, _>("plc", SystemType::Plc, "plc.json5", |config, bus| {
        let plc = &config.plc;
        tracing::info!(
            connection = %plc.connection.describe(),
            unit = plc.unit_id,
            polling_ms = plc.polling.time_ms,
            "Configuring PLC driver"
        );

        let driver: Arc<dyn Driver> = match &plc.connection {
            ConnectionConfig::Memory { size } => {
                let io = Arc::new(MemoryRegisters::new(*size));
                Arc::new(RegisterDriver::with_registers(plc, io, bus))
            }
            connection => {
                let io = Arc::new(ModbusIo::new(
                    connection.clone(),
                    plc.unit_id,
                    plc.connect_timeout(),
                ));
                Arc::new(RegisterDriver::with_registers(plc, io, bus))
            }
        };
        Ok(driver)
    })
    .await
}
