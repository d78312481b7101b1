//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if the
/// filter does not parse or a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::Config(format!("Invalid log filter {}: {}", config.filter, e)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
    tracing::info!(filter = %config.filter, json = config.json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_installed_once() {
        let config = LoggingConfig::default();
        assert!(init(&config).is_ok());
        assert!(matches!(init(&config), Err(Error::Config(_))));
    }
}
