//! Zenoh implementation of the bus.

use std::sync::Arc;

use async_trait::async_trait;

use fieldgate_common::KeyExprBuilder;

use crate::error::{DriverError, Result};
use crate::pipeline::Bus;

/// Publishes driver output on a zenoh session.
///
/// Value channels land below `<prefix>/<system>/<driver id>/`.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
}

impl Publisher {
    pub fn new(session: Arc<zenoh::Session>, keys: KeyExprBuilder) -> Self {
        Self { session, keys }
    }

    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Publish raw bytes to a full key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| DriverError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a JSON value to a full key.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

#[async_trait]
impl Bus for Publisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let key = self.keys.channel_key(channel);
        self.publish_raw(&key, payload).await
    }
}
