//! Tracing subscriber bootstrap

use crate::config::LoggingConfig;
use crate::error::{RuntimeError, RuntimeResult};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &LoggingConfig) -> RuntimeResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RuntimeError::Logging(format!("invalid filter '{}': {}", config.level, e)))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_thread_names(true))
            .with(filter)
            .try_init()
    };
    installed.map_err(|e| RuntimeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig {
            level: "debug".into(),
            json: true,
        };
        // Other tests in this binary may have installed one already.
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(RuntimeError::Logging(_))));
    }
}
