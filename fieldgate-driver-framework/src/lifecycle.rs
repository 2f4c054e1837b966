//! Connection lifecycle: connect with retry, supervision and reconnection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};

use crate::client::{ClientError, ClientFactory, ClientResult, ProtocolClient};
use crate::config::RetryConfig;
use crate::error::{DriverError, Result};
use crate::health::DriverHealth;

/// Connection state of a driver. Only [`Lifecycle`] changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub wait: Duration,
    pub max_wait: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn fixed(wait: Duration) -> Self {
        Self {
            wait,
            max_wait: wait,
            exponential: false,
        }
    }

    /// Delay before attempt `attempt + 1`, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.wait;
        }
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.wait.saturating_mul(factor).min(self.max_wait)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            wait: Duration::from_millis(config.wait_ms),
            max_wait: Duration::from_millis(config.max_wait_ms.max(config.wait_ms)),
            exponential: config.exponential,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

/// Notified by the supervisor after it re-established a dropped connection.
#[async_trait]
pub trait ReconnectHandler: Send + Sync + 'static {
    async fn on_reconnected(&self);
}

/// Owns the protocol client and the authoritative [`DriverState`].
pub struct Lifecycle<C: ProtocolClient> {
    name: String,
    factory: Arc<dyn ClientFactory<C>>,
    client: RwLock<Option<Arc<C>>>,
    state: watch::Sender<DriverState>,
    shutdown: watch::Sender<bool>,
    connecting: Mutex<()>,
    retry: RetryPolicy,
    check_interval: Duration,
    health: Arc<DriverHealth>,
}

impl<C: ProtocolClient> Lifecycle<C> {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ClientFactory<C>>,
        config: &RetryConfig,
        health: Arc<DriverHealth>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            client: RwLock::new(None),
            state: watch::Sender::new(DriverState::Disconnected),
            shutdown: watch::Sender::new(false),
            connecting: Mutex::new(()),
            retry: RetryPolicy::from(config),
            check_interval: config.check_interval(),
            health,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Observe the shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn health(&self) -> &Arc<DriverHealth> {
        &self.health
    }

    fn set_state(&self, state: DriverState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(driver = %self.name, from = ?previous, to = ?state, "Driver state changed");
        }
    }

    /// The current client, connected or not.
    pub fn client(&self) -> Option<Arc<C>> {
        self.client.read().clone()
    }

    /// The current client if the connection is up.
    pub fn connected_client(&self) -> ClientResult<Arc<C>> {
        match self.client() {
            Some(client) if self.state() == DriverState::Connected && client.is_connected() => {
                Ok(client)
            }
            _ => Err(ClientError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected_client().is_ok()
    }

    /// Connect, retrying transient failures until connected or shut down.
    ///
    /// Resolves with `Err(DriverError::Shutdown)` when abandoned by [`shutdown`](Self::shutdown)
    /// and with the client error when it is not transient (state becomes `Failed`).
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connecting.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(DriverError::Shutdown);
        }

        self.set_state(DriverState::Connecting);
        let mut attempt = 0u32;

        loop {
            match self.try_connect().await {
                Ok(client) => {
                    *self.client.write() = Some(client);
                    self.set_state(DriverState::Connected);
                    self.health.record_connect();
                    tracing::info!(driver = %self.name, attempts = attempt + 1, "Connected");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    let delay = self.retry.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        driver = %self.name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Connection attempt failed"
                    );

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            self.set_state(DriverState::Disconnected);
                            return Err(DriverError::Shutdown);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(driver = %self.name, error = %e, "Connection failed permanently");
                    self.set_state(DriverState::Failed);
                    return Err(e.into());
                }
            }
        }
    }

    async fn try_connect(&self) -> ClientResult<Arc<C>> {
        let client = self.factory.create().await?;
        client.connect().await?;
        Ok(client)
    }

    /// Drop the current client. The supervisor does not reconnect afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        let client = self.client.write().take();
        self.set_state(DriverState::Disconnected);

        if let Some(client) = client {
            client.disconnect().await?;
            tracing::info!(driver = %self.name, "Disconnected");
        }
        Ok(())
    }

    /// Signal shutdown to pending connects and the supervisor.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Start the supervisor loop.
    ///
    /// While `Connected`, the live connection is checked every interval. A drop moves the
    /// driver back to `Connecting`, reconnects and then notifies `handler`. A reconnect
    /// that fails is retried with the backoff; only an invalid endpoint stops supervision.
    pub fn spawn_supervisor(self: &Arc<Self>, handler: Arc<dyn ReconnectHandler>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise(handler).await })
    }

    async fn supervise(&self, handler: Arc<dyn ReconnectHandler>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.state() {
                DriverState::Connected => {
                    if self.client().is_some_and(|c| c.is_connected()) {
                        continue;
                    }
                    tracing::warn!(driver = %self.name, "Connection lost, reconnecting");
                    let stale = self.client.write().take();
                    if let Some(stale) = stale {
                        if let Err(e) = stale.disconnect().await {
                            tracing::debug!(driver = %self.name, error = %e, "Closing stale client failed");
                        }
                    }
                }
                // Only a reconnect started here is retried; a failed first connect stays failed.
                DriverState::Failed if failures > 0 => {
                    let delay = self.retry.delay(failures - 1);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ => continue,
            }
            self.set_state(DriverState::Connecting);

            match self.connect().await {
                Ok(()) => {
                    failures = 0;
                    self.health.record_reconnect();
                    handler.on_reconnected().await;
                }
                Err(DriverError::Shutdown) => break,
                Err(DriverError::Client(ClientError::InvalidEndpoint(endpoint))) => {
                    tracing::error!(driver = %self.name, endpoint = %endpoint, "Supervisor stopped");
                    break;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(driver = %self.name, error = %e, failures, "Reconnect failed, retrying");
                }
            }
        }

        tracing::debug!(driver = %self.name, "Supervisor finished");
    }
}
