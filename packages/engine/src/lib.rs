// packages/engine/src/lib.rs
//! Gatehook Engine Library
//!
//! Session-aware interception of game client traffic. Decoded packets are
//! routed through ordered chains of module hooks, and server-authoritative
//! session state is mirrored from snapshots and deltas so modules can watch
//! individual fields.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **proxy**: Host classification, session demultiplexing, session lifecycle
//! - **dispatch**: Per-session hook chains, module registry, fault isolation
//! - **state**: Mirrored session state and per-path subscriptions
//! - **interception**: Host filter, certificate cache, HTTP transport
//! - **observability**: Tracing and metrics setup
//! - **utils**: Configuration and errors

// Public module exports
pub mod dispatch;
pub mod interception;
pub mod observability;
pub mod proxy;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use dispatch::{Dispatch, ModuleContext, ModuleRegistry, PacketMeta};
pub use proxy::{InterceptedRequest, Proxy, RequestOutcome, SessionKey};
pub use state::{StateEvent, StateStore};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
