//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Build the filter: `RUST_LOG` when set, otherwise `config.level`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the configured level is not a
/// valid filter directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Invalid {
        field: "logging.level".to_owned(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber in the configured format.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for a bad level and
/// [`ConfigError::Logging`] when a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;
    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_levels() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "chronicle=verbose".to_owned(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(env_filter(&config), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn second_install_reports_an_error() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(ConfigError::Logging(_))));
    }
}
