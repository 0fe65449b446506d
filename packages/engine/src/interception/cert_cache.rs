// packages/engine/src/interception/cert_cache.rs
//! Bounded LRU cache of per-host leaf certificates
//!
//! Generating a leaf certificate costs far more than a TLS handshake, and a
//! client talks to the same handful of hosts over and over. Lookup and, on a
//! miss, generation both happen under one lock for the whole cache. Two
//! different hosts can therefore not be generated in parallel, but a host is
//! never generated twice concurrently and never cached twice. A per-host
//! lock would allow parallel generation if that ever matters.

use crate::utils::errors::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Certificate cache keyed by hostname
#[derive(Debug)]
pub struct CertCache<T> {
    lru: Mutex<LruCache<String, T>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> CertCache<T> {
    /// Create a cache holding at most `capacity` certificates
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached certificate for `hostname`, generating it on a miss.
    ///
    /// Generation failures are returned to the caller and not cached.
    pub fn fetch<F>(&self, hostname: &str, generate: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut lru = self.lru.lock();

        if let Some(cert) = lru.get(hostname) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("gatehook_cert_cache_hits_total").increment(1);
            return Ok(cert.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gatehook_cert_cache_misses_total").increment(1);

        let cert = generate().map_err(|e| {
            warn!("Cache missed on {} and failed to generate cert: {}", hostname, e);
            e
        })?;

        if let Some((evicted, _)) = lru.push(hostname.to_string(), cert.clone()) {
            debug!("certstore: {} evicted", evicted);
        }
        Ok(cert)
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lru.lock().cap().get()
    }

    /// Whether `hostname` is cached, without touching its recency
    pub fn contains(&self, hostname: &str) -> bool {
        self.lru.lock().contains(hostname)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::EngineError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting(calls: &AtomicUsize, host: &str) -> Result<String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cert:{}", host))
    }

    #[test]
    fn test_hit_skips_generation() {
        let cache = CertCache::new(4);
        let calls = AtomicUsize::new(0);

        let first = cache.fetch("a.com", || counting(&calls, "a.com")).unwrap();
        let second = cache.fetch("a.com", || counting(&calls, "a.com")).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_lru_eviction() {
        let cache = CertCache::new(2);
        let calls = AtomicUsize::new(0);

        cache.fetch("a", || counting(&calls, "a")).unwrap();
        cache.fetch("b", || counting(&calls, "b")).unwrap();
        // Touch "a" so "b" becomes least recently used
        cache.fetch("a", || counting(&calls, "a")).unwrap();
        cache.fetch("c", || counting(&calls, "c")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));

        // Evicted host is regenerated on the next fetch
        cache.fetch("b", || counting(&calls, "b")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache: CertCache<String> = CertCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_failure_not_cached() {
        let cache: CertCache<String> = CertCache::new(2);

        let err = cache
            .fetch("bad", || Err(EngineError::CertificateGeneration("no CA".to_string())))
            .unwrap_err();
        assert!(matches!(err, EngineError::CertificateGeneration(_)));
        assert!(cache.is_empty());

        let ok = cache.fetch("bad", || Ok("cert".to_string())).unwrap();
        assert_eq!(ok, "cert");
    }

    #[test]
    fn test_concurrent_same_host_generates_once() {
        let cache = Arc::new(CertCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .fetch("same.host", || {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            counting(&calls, "same.host")
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "cert:same.host");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
