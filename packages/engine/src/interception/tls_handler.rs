// packages/engine/src/interception/tls_handler.rs
//! TLS collaborator boundary
//!
//! The engine does not terminate TLS or mint certificates itself. A transport
//! that does supplies a [`CertificateGenerator`]; the handler fronts it with
//! the bounded [`CertCache`] so each intercepted host costs one generation
//! until it falls out of the cache. With `disable_cert_store` every request
//! goes straight to the generator.

use crate::interception::cert_cache::{CacheStats, CertCache};
use crate::utils::config::TlsConfig;
use crate::utils::errors::{EngineError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Leaf certificate material for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Produces a leaf certificate for a host
pub trait CertificateGenerator: Send + Sync {
    fn generate(&self, domain: &str) -> Result<CertificateData>;
}

impl<F> CertificateGenerator for F
where
    F: Fn(&str) -> Result<CertificateData> + Send + Sync,
{
    fn generate(&self, domain: &str) -> Result<CertificateData> {
        self(domain)
    }
}

/// TLS handler for HTTPS interception
pub struct TlsHandler {
    config: TlsConfig,
    generator: Arc<dyn CertificateGenerator>,
    /// `None` when the cert store is disabled
    cache: Option<CertCache<Arc<CertificateData>>>,
}

impl TlsHandler {
    /// Create a handler with a cache sized from `config`
    pub fn new(config: TlsConfig, generator: Arc<dyn CertificateGenerator>) -> Self {
        if !config.enabled {
            warn!("TLS interception disabled");
        } else if config.disable_cert_store {
            info!("TLS interception enabled, cert store disabled");
        } else {
            info!(
                "TLS interception enabled, caching up to {} certificates",
                config.cert_cache_capacity
            );
        }

        let cache = (!config.disable_cert_store)
            .then(|| CertCache::new(config.cert_cache_capacity));
        Self {
            config,
            generator,
            cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Certificate for `domain`, from cache or freshly generated
    pub fn certificate_for(&self, domain: &str) -> Result<Arc<CertificateData>> {
        if !self.config.enabled {
            return Err(EngineError::CertificateGeneration(
                "TLS interception is disabled".to_string(),
            ));
        }

        match &self.cache {
            Some(cache) => cache.fetch(domain, || self.generate(domain)),
            None => self.generate(domain),
        }
    }

    fn generate(&self, domain: &str) -> Result<Arc<CertificateData>> {
        debug!("Generating certificate for {}", domain);
        let cert = self.generator.generate(domain)?;
        if cert.domain != domain {
            return Err(EngineError::CertificateGeneration(format!(
                "generator returned a certificate for {} when asked for {}",
                cert.domain, domain
            )));
        }
        Ok(Arc::new(cert))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .as_ref()
            .map(CertCache::stats)
            .unwrap_or_default()
    }

    pub fn cached_hosts(&self) -> usize {
        self.cache.as_ref().map_or(0, CertCache::len)
    }
}

impl fmt::Debug for TlsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsHandler")
            .field("config", &self.config)
            .field("cached_hosts", &self.cached_hosts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn placeholder(domain: &str) -> Result<CertificateData> {
        Ok(CertificateData {
            domain: domain.to_string(),
            cert_pem: format!("CERT {}", domain),
            key_pem: "KEY".to_string(),
        })
    }

    #[test]
    fn test_config_default() {
        let config = TlsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.cert_cache_capacity, 64);
    }

    #[test]
    fn test_certificate_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = {
            let calls = Arc::clone(&calls);
            move |domain: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                placeholder(domain)
            }
        };
        let handler = TlsHandler::new(TlsConfig::default(), Arc::new(generator));

        let first = handler.certificate_for("api.example.com").unwrap();
        let second = handler.certificate_for("api.example.com").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.domain, "api.example.com");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_cert_store_generates_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = {
            let calls = Arc::clone(&calls);
            move |domain: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                placeholder(domain)
            }
        };
        let config = TlsConfig {
            disable_cert_store: true,
            ..Default::default()
        };
        let handler = TlsHandler::new(config, Arc::new(generator));

        let first = handler.certificate_for("api.example.com").unwrap();
        let second = handler.certificate_for("api.example.com").unwrap();

        assert_eq!(first, second);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handler.cached_hosts(), 0);
        assert_eq!(handler.cache_stats(), CacheStats::default());
    }

    #[test]
    fn test_disabled_handler_refuses() {
        let config = TlsConfig {
            enabled: false,
            ..Default::default()
        };
        let handler = TlsHandler::new(config, Arc::new(placeholder));

        assert!(!handler.is_enabled());
        assert!(handler.certificate_for("a.com").is_err());
    }

    #[test]
    fn test_mismatched_domain_rejected() {
        let handler = TlsHandler::new(
            TlsConfig::default(),
            Arc::new(|_: &str| placeholder("other.com")),
        );

        assert!(handler.certificate_for("a.com").is_err());
        assert_eq!(handler.cached_hosts(), 0);
    }
}
