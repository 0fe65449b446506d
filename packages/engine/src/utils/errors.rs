// packages/engine/src/utils/errors.rs
//! Engine error types
//!
//! Every failure in the engine degrades a single packet, hook or host. None of
//! these variants are fatal to a session or to the process.

use thiserror::Error;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the interception engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A dot-delimited path did not resolve against the session mirror
    #[error("path not found in session state: {path}")]
    NotFound { path: String },

    /// A snapshot or delta payload could not be parsed
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The certificate collaborator failed to produce a certificate
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// Transport-level failure while proxying an exchange
    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Shorthand for a missing state path
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("a.b.x");
        assert_eq!(err.to_string(), "path not found in session state: a.b.x");
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.to_string(), "address in use");
    }
}
