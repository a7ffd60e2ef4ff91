//! Tracing subscriber setup

use crate::config::MonitoringConfig;
use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Build the log filter from the configured directive
pub fn env_filter(config: &MonitoringConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(&config.log_level).map_err(|e| {
        Error::Configuration(format!("Invalid log level {:?}: {}", config.log_level, e))
    })
}

/// Install the global tracing subscriber
///
/// `structured_logging` selects JSON lines; otherwise the human-readable
/// format is used.
///
/// # Errors
///
/// Returns `Error::Configuration` if the log level does not parse or a
/// global subscriber is already installed.
pub fn init(config: &MonitoringConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.structured_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| {
        Error::Configuration(format!("Failed to install tracing subscriber: {}", e))
    })?;

    tracing::info!(
        level = %config.log_level,
        structured = config.structured_logging,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_directives() {
        let config = MonitoringConfig {
            log_level: "info,kuba_rollup::fetch=debug".to_string(),
            structured_logging: false,
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        let config = MonitoringConfig {
            log_level: "kuba_rollup=notalevel".to_string(),
            structured_logging: false,
        };
        assert!(matches!(env_filter(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = MonitoringConfig::default();
        // Another test may have installed one already
        let _ = init(&config);
        assert!(matches!(init(&config), Err(Error::Configuration(_))));
    }
}
