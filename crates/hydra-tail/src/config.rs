//! Client configuration assembled from a config file and command-line
//! overrides.

use std::path::Path;

use anyhow::Context;
use hydra_realtime::ClientConfig;

/// Builds the client config: file values first, then explicit overrides.
///
/// A missing config file is not an error; defaults are used instead.
pub fn resolve_client_config(
    path: Option<&Path>,
    url: Option<String>,
    request_timeout_ms: Option<u64>,
) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) if path.exists() => ClientConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        Some(path) => {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            ClientConfig::default()
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = url {
        config.url = url;
    }
    if let Some(ms) = request_timeout_ms {
        config.request_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}
