// packages/engine/src/observability.rs
//! Logging and metrics setup
//!
//! `RUST_LOG` overrides the configured level. Metrics are only exported when
//! a Prometheus listen address is configured; the counters are recorded
//! either way and go nowhere without a recorder.

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let installed = if config.json {
        registry
            .with(fmt::layer().with_target(true).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };

    installed.map_err(|e| EngineError::ConfigError(format!("tracing already initialized: {}", e)))
}

/// Install the Prometheus exporter if an address is configured
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let Some(addr) = config.listen_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("metrics exporter: {}", e)))?;

    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_from_config() {
        let config = LoggingConfig {
            level: "gatehook_engine=debug".to_string(),
            json: false,
        };
        // Parsing is lenient; this only checks construction does not panic
        let _filter = env_filter(&config);
    }

    #[test]
    fn test_metrics_disabled_without_address() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }
}
