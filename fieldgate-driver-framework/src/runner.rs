//! Driver runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use fieldgate_common::{KeyExprBuilder, LoggingConfig, SystemType, Topic, connect, init_tracing};

use crate::args::DriverArgs;
use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::pipeline::Bus;
use crate::publisher::Publisher;
use crate::service::DriverService;
use crate::status::DriverStatus;

/// Runs one protocol driver inside a gateway process.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection
/// - Request queryables, initial topics and health publication
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use fieldgate_driver_framework::{DriverArgs, DriverConfig, DriverRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = DriverArgs::parse_with_default("opcua.json5");
///     let config = OpcUaDriverConfig::load(&args.config)?;
///
///     let runner = DriverRunner::new_with_args("opcua", SystemType::OpcUa, config, Some(&args)).await?;
///     let driver = OpcUaDriver::new(runner.config().opcua.clone(), runner.bus())?;
///
///     runner.run(driver).await
/// }
/// ```
pub struct DriverRunner<C: DriverConfig> {
    name: String,
    version: String,
    system: SystemType,
    config: C,
    session: Arc<zenoh::Session>,
    publisher: Publisher,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: DriverConfig> DriverRunner<C> {
    pub async fn new(name: impl Into<String>, system: SystemType, config: C) -> Result<Self> {
        Self::new_with_args(name, system, config, None).await
    }

    /// Create a runner, applying command line overrides.
    ///
    /// This will:
    /// 1. Initialize logging (`--log-level` wins over the file)
    /// 2. Connect to Zenoh
    /// 3. Create the publisher for the driver's key space
    pub async fn new_with_args(
        name: impl Into<String>,
        system: SystemType,
        mut config: C,
        args: Option<&DriverArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let mut log_config = config.logging().clone();
        if let Some(args) = args {
            if let Some(level) = &args.log_level {
                log_config = LoggingConfig {
                    level: level.clone(),
                    ..log_config
                };
            }
            if let Some(id) = &args.id {
                config.set_driver_id(id.clone());
            }
        }

        init_tracing(&log_config).map_err(|e| DriverError::config(e.to_string()))?;

        tracing::info!(driver = %name, id = %config.driver_id(), version = %version, "Starting driver");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| DriverError::ZenohConnection(e.to_string()))?,
        );

        tracing::info!(zid = %session.zid(), "Connected to Zenoh");

        Ok(Self::with_session(name, system, config, session))
    }

    /// Create a runner on an existing session. Logging is left untouched.
    pub fn with_session(
        name: impl Into<String>,
        system: SystemType,
        config: C,
        session: Arc<zenoh::Session>,
    ) -> Self {
        let keys = KeyExprBuilder::with_prefix(config.key_prefix(), system, config.driver_id());
        let publisher = Publisher::new(session.clone(), keys);

        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            system,
            config,
            session,
            publisher,
            shutdown: watch::Sender::new(false),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// The bus drivers publish values on.
    pub fn bus(&self) -> Arc<dyn Bus> {
        Arc::new(self.publisher.clone())
    }

    /// Spawn a task stopped at shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Run the driver until Ctrl+C is received.
    pub async fn run(self, driver: Arc<dyn Driver>) -> Result<()> {
        self.run_until(driver, async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the driver until `stop` completes.
    ///
    /// This will:
    /// 1. Serve requests and publish "running" status
    /// 2. Subscribe the initial topics and connect in the background
    /// 3. Publish health periodically
    /// 4. On `stop`, shut the driver down, publish "offline" status and close the session
    pub async fn run_until<F>(mut self, driver: Arc<dyn Driver>, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let service = DriverService::new(
            self.session.clone(),
            self.publisher.keys().clone(),
            driver.clone(),
        );
        let service_tasks = service.start(self.shutdown.subscribe()).await?;
        self.tasks.extend(service_tasks);

        let topics = self.initial_topics();
        let starter = driver.clone();
        let status_publisher = self.publisher.clone();
        let version = self.version.clone();
        self.spawn(async move {
            if !topics.is_empty() {
                let results = starter.subscribe_topics(topics).await;
                let failed = results.iter().filter(|ok| !**ok).count();
                tracing::info!(count = results.len(), failed, "Initial topics registered");
            }
            if let Err(e) = starter.connect().await {
                if !matches!(e, DriverError::Shutdown) {
                    tracing::error!(driver = %starter.id(), error = %e, "Driver failed to connect");
                    let status = DriverStatus::error(
                        starter.id(),
                        starter.system_type().as_str(),
                        &version,
                        e.to_string(),
                    )
                    .with_state(starter.state());
                    if let Err(e) = status.publish(&status_publisher).await {
                        tracing::warn!(error = %e, "Failed to publish error status");
                    }
                }
            }
        });

        if let Some(health) = driver.health() {
            let publisher = self.publisher.clone();
            let health_driver = driver.clone();
            let period = self.config.health_interval();
            let mut shutdown = self.shutdown.subscribe();
            self.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    if let Err(e) = health.publish(&publisher, health_driver.state()).await {
                        tracing::debug!(error = %e, "Failed to publish health");
                    }
                }
            });
        }

        let running = DriverStatus::running(driver.id(), self.system.as_str(), &self.version)
            .with_state(driver.state());
        if let Err(e) = running.publish(&self.publisher).await {
            tracing::warn!(error = %e, "Failed to publish running status");
        }

        tracing::info!(
            driver = %self.name,
            id = %driver.id(),
            tasks = self.tasks.len(),
            "Driver running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(driver = %self.name, "Received shutdown signal");

        self.shutdown.send_replace(true);
        if let Err(e) = driver.shutdown().await {
            tracing::warn!(error = %e, "Driver shutdown failed");
        }
        for task in &self.tasks {
            task.abort();
        }

        let offline = DriverStatus::offline(driver.id(), self.system.as_str(), &self.version);
        if let Err(e) = offline.publish(&self.publisher).await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(driver = %self.name, "Goodbye!");
        Ok(())
    }

    fn initial_topics(&self) -> Vec<Topic> {
        self.config
            .initial_topics()
            .iter()
            .filter_map(|text| match Topic::parse(text) {
                Ok(topic) if topic.system_type == self.system => Some(topic),
                Ok(topic) => {
                    tracing::warn!(topic = %text, system = %topic.system_type, "Initial topic belongs to another system");
                    None
                }
                Err(e) => {
                    tracing::warn!(topic = %text, error = %e, "Invalid initial topic");
                    None
                }
            })
            .collect()
    }
}

/// Run a driver with minimal boilerplate.
///
/// `build` creates the driver from the loaded configuration and the runner's bus.
pub async fn run_driver<C, F>(
    name: &str,
    system: SystemType,
    default_config: &'static str,
    build: F,
) -> anyhow::Result<()>
where
    C: DriverConfig,
    F: FnOnce(&C, Arc<dyn Bus>) -> Result<Arc<dyn Driver>>,
{
    let args = DriverArgs::parse_with_default(default_config);
    let config = C::load(&args.config)?;

    let runner = DriverRunner::new_with_args(name, system, config, Some(&args)).await?;
    let driver = build(runner.config(), runner.bus())?;

    runner.run(driver).await?;
    Ok(())
}
