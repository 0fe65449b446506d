// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Configuration is layered: built-in defaults, then an optional
//! `config/engine.{toml,yaml,json}` file, then `GATEHOOK__SECTION__KEY`
//! environment variables.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::debug;

/// Default location of the optional configuration file (extension inferred)
const DEFAULT_CONFIG_FILE: &str = "config/engine";

/// Environment variable prefix
const ENV_PREFIX: &str = "GATEHOOK";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub proxy: ProxyConfig,
    pub state: StateConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Front-end traffic classification and session routing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listen address
    pub listen_addr: SocketAddr,

    /// Reject traffic to hosts matching `host_filter`
    pub enable_host_filter: bool,

    /// Host fragments (regex syntax) that are rejected outright
    pub host_filter: Vec<String>,

    /// Pattern matched against `host:port` of game traffic. Capture group 1
    /// selects the region.
    pub game_host_pattern: String,

    /// Host capture -> region code
    pub regions: HashMap<String, String>,

    /// Operation that creates a session
    pub login_op: String,

    /// Header carrying the numeric user id
    pub uid_header: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut regions = HashMap::new();
        regions.insert("global".to_string(), "GL".to_string());
        regions.insert("jp".to_string(), "JP".to_string());

        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_host_filter: false,
            host_filter: vec![
                r"android\.bugly\.qq\.com".to_string(),
                r"sessions\.bugsnag\.com".to_string(),
                r"app\.adjust\.com".to_string(),
            ],
            game_host_pattern: r"^gs\.arknights\.(jp|global):8443$".to_string(),
            regions,
            login_op: "C/account/login".to_string(),
            uid_header: "uid".to_string(),
        }
    }
}

/// Session state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Operation carrying the full session snapshot
    pub snapshot_op: String,

    /// Top-level key holding the snapshot document
    pub snapshot_key: String,

    /// Dot-delimited key holding the delta document in every other packet
    pub delta_key: String,

    /// Capacity of the pending path-hook registration queue
    pub hook_queue_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_op: "S/account/syncData".to_string(),
            snapshot_key: "user".to_string(),
            delta_key: "playerDataDelta.modified".to_string(),
            hook_queue_capacity: 100,
        }
    }
}

/// TLS collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS interception
    pub enabled: bool,

    /// Number of leaf certificates kept in memory
    pub cert_cache_capacity: usize,

    /// Generate a certificate for every handshake instead of caching.
    /// Saves memory at the cost of latency and CPU.
    pub disable_cert_store: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 64 certificates is far more hosts than a single client talks to.
            cert_cache_capacity: 64,
            disable_cert_store: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint, disabled when unset
    pub listen_addr: Option<SocketAddr>,
}

impl EngineConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
        Self::finish(builder)
    }

    /// Load configuration from an explicit file and environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!("Configuration resolved: {:?}", config);

        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tls.cert_cache_capacity == 0 && !self.tls.disable_cert_store {
            return Err(EngineError::ConfigError(
                "tls.cert_cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.state.hook_queue_capacity == 0 {
            return Err(EngineError::ConfigError(
                "state.hook_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.state.snapshot_op.is_empty() || self.state.delta_key.is_empty() {
            return Err(EngineError::ConfigError(
                "state.snapshot_op and state.delta_key must be set".to_string(),
            ));
        }
        Ok(())
    }
}
