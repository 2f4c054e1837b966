//! Fieldgate driver for DDS domains.

use std::sync::Arc;

use anyhow::Result;
use fieldgate_driver_framework::{ClientFactory, Driver, SystemType, run_driver};

use zenoh_bridge_dds::{
    DdsBridgeConfig, DdsDriver, DdsParticipant, DdsParticipantFactory, LoopbackDomain,
    TypeRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    run_driver::<DdsBridgeConfig, _>("dds", SystemType::Dds, "dds.json5", |config, bus| {
        let dds = &config.dds;
        let types = Arc::new(TypeRegistry::from_config(&dds.topic_types)?);
        tracing::info!(domain = dds.domain, types = types.len(), "Joining DDS domain");

        let domain = Arc::new(LoopbackDomain::new(dds.domain));
        let factory: Arc<dyn ClientFactory<DdsParticipant>> =
            Arc::new(DdsParticipantFactory::new(domain, types.clone()));
        let driver: Arc<dyn Driver> = Arc::new(DdsDriver::new(dds, types, factory, bus));
        Ok(driver)
    })
    .await
}
