// packages/engine/src/interception/host_filter.rs
//! Host classification for inbound proxy traffic
//!
//! Every request is sorted into one of three buckets before anything else
//! happens to it:
//!
//! - **Blocked**: telemetry hosts on the denylist, answered locally
//! - **Game**: hosts matching the game-server pattern, dispatched per session
//! - **PassThrough**: everything else, forwarded untouched

use crate::utils::config::ProxyConfig;
use crate::utils::errors::{EngineError, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// How the proxy treats traffic to a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostClass {
    Blocked,
    PassThrough,
    Game { region: String },
}

/// Denylist plus game-host matcher
#[derive(Debug, Clone)]
pub struct HostFilter {
    /// Rejected hosts, `None` when filtering is disabled
    deny: Option<Regex>,

    /// Matches `host:port` of game traffic, group 1 selects the region
    game_host: Regex,

    /// Capture -> region code
    regions: HashMap<String, String>,
}

impl HostFilter {
    /// Build the filter from proxy configuration
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let deny = if config.enable_host_filter {
            Self::generate_filter(&config.host_filter)?
        } else {
            None
        };

        let game_host = Regex::new(&config.game_host_pattern).map_err(|e| {
            EngineError::ConfigError(format!("invalid game_host_pattern: {}", e))
        })?;
        if game_host.captures_len() < 2 {
            return Err(EngineError::ConfigError(
                "game_host_pattern needs a capture group selecting the region".to_string(),
            ));
        }

        Ok(Self {
            deny,
            game_host,
            regions: config.regions.clone(),
        })
    }

    /// Compile host fragments into one alternation matching any host that
    /// contains one of them
    pub fn generate_filter(fragments: &[String]) -> Result<Option<Regex>> {
        if fragments.is_empty() {
            return Ok(None);
        }

        let pattern = fragments
            .iter()
            .map(|f| format!("(^.*{}.*$)", f))
            .collect::<Vec<_>>()
            .join("|");

        Regex::new(&pattern)
            .map(Some)
            .map_err(|e| EngineError::ConfigError(format!("invalid host_filter: {}", e)))
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.deny.as_ref().is_some_and(|deny| deny.is_match(host))
    }

    /// Whether a CONNECT to `host` should be intercepted rather than refused
    pub fn should_intercept(&self, host: &str) -> bool {
        !self.is_blocked(host)
    }

    /// Classify a request addressed to `host` (`host:port` for game traffic)
    pub fn classify(&self, host: &str) -> HostClass {
        if self.is_blocked(host) {
            debug!("==== Rejecting {}", host);
            return HostClass::Blocked;
        }

        let Some(captures) = self.game_host.captures(host) else {
            return HostClass::PassThrough;
        };

        let suffix = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        match self.regions.get(suffix) {
            Some(region) => HostClass::Game {
                region: region.clone(),
            },
            None => {
                warn!("Game host {} has no region mapping for '{}'", host, suffix);
                HostClass::PassThrough
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(enabled: bool) -> HostFilter {
        let config = ProxyConfig {
            enable_host_filter: enabled,
            ..Default::default()
        };
        HostFilter::from_config(&config).unwrap()
    }

    #[test]
    fn test_game_hosts() {
        let filter = filter(true);
        assert_eq!(
            filter.classify("gs.arknights.global:8443"),
            HostClass::Game { region: "GL".to_string() }
        );
        assert_eq!(
            filter.classify("gs.arknights.jp:8443"),
            HostClass::Game { region: "JP".to_string() }
        );
        assert_eq!(filter.classify("gs.arknights.global:443"), HostClass::PassThrough);
        assert_eq!(filter.classify("example.com"), HostClass::PassThrough);
    }

    #[test]
    fn test_telemetry_blocked() {
        let filter = filter(true);
        assert_eq!(filter.classify("sessions.bugsnag.com:443"), HostClass::Blocked);
        assert_eq!(filter.classify("app.adjust.com"), HostClass::Blocked);
        assert!(!filter.should_intercept("android.bugly.qq.com:443"));
        assert!(filter.should_intercept("gs.arknights.global:8443"));
    }

    #[test]
    fn test_filter_disabled() {
        let filter = filter(false);
        assert_eq!(filter.classify("sessions.bugsnag.com"), HostClass::PassThrough);
        assert!(filter.should_intercept("app.adjust.com"));
    }

    #[test]
    fn test_unmapped_region_passes_through() {
        let mut config = ProxyConfig::default();
        config.regions.remove("jp");
        let filter = HostFilter::from_config(&config).unwrap();

        assert_eq!(filter.classify("gs.arknights.jp:8443"), HostClass::PassThrough);
    }

    #[test]
    fn test_pattern_without_capture_rejected() {
        let config = ProxyConfig {
            game_host_pattern: r"^gs\.example\.com$".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HostFilter::from_config(&config),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_fragments() {
        assert!(HostFilter::generate_filter(&[]).unwrap().is_none());
    }
}
