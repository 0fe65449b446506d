// packages/engine/src/utils/mod.rs
//! Shared utilities
//!
//! - **Errors**: Engine-wide error taxonomy and `Result` alias
//! - **Config**: Layered configuration (file + environment)

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
