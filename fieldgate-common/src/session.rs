use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate a [`ZenohConfig`] into a native zenoh configuration.
pub fn build_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    let mode = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(Error::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };
    insert(&mut zenoh_config, "mode", &mode)?;

    if !config.connect.is_empty() {
        let endpoints = serde_json::to_string(&config.connect)?;
        insert(&mut zenoh_config, "connect/endpoints", &endpoints)?;
    }

    if !config.listen.is_empty() {
        let endpoints = serde_json::to_string(&config.listen)?;
        insert(&mut zenoh_config, "listen/endpoints", &endpoints)?;
    }

    if config.no_multicast_scouting {
        insert(&mut zenoh_config, "scouting/multicast/enabled", "false")?;
    }

    Ok(zenoh_config)
}

fn insert(config: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    config
        .insert_json5(key, value)
        .map_err(|e| Error::Config(format!("Failed to set '{}': {}", key, e)))
}

/// Open a zenoh session using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = build_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_mode_rejected() {
        let config = ZenohConfig {
            mode: "satellite".to_string(),
            ..Default::default()
        };
        assert!(matches!(build_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_with_endpoints() {
        let config = ZenohConfig {
            mode: "client".to_string(),
            connect: vec!["tcp/127.0.0.1:7447".to_string()],
            listen: vec![],
            no_multicast_scouting: true,
        };
        assert!(build_config(&config).is_ok());
    }
}
