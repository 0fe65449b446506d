// packages/engine/src/interception/mod.rs
//! Traffic interception layer
//!
//! Everything between the socket and the session front-end:
//!
//! - **Host Filter**: Telemetry denylist and game-host classification
//! - **Cert Cache**: Bounded LRU of generated leaf certificates
//! - **TLS Handler**: Per-host certificates for intercepted CONNECT tunnels
//! - **HTTP Interceptor**: Plain-HTTP forward proxy feeding the front-end
//!
//! # Architecture
//!
//! ```text
//! Client
//!     │
//!     ├─ CONNECT host:443 → Host Filter → refuse | TLS Handler → Cert Cache
//!     └─ HTTP request    → HTTP Interceptor → Proxy → upstream
//! ```

pub mod cert_cache;
pub mod host_filter;
pub mod http_interceptor;
pub mod tls_handler;

// Re-export commonly used types
pub use cert_cache::{CacheStats, CertCache};
pub use host_filter::{HostClass, HostFilter};
pub use http_interceptor::{HttpInterceptor, InterceptorConfig};
pub use tls_handler::{CertificateData, CertificateGenerator, TlsHandler};
