//! # Error Types
//!
//! Custom error types for Quad Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Quad Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Radio link errors (open, send, close)
    #[error("link error: {0}")]
    Link(String),

    /// A telemetry log block was rejected by the device capability table
    #[error("log block '{block}' rejected: {reason}")]
    LogBlock { block: String, reason: String },

    /// Parameter push/pull errors
    #[error("parameter error: {0}")]
    Param(String),

    /// Radio driver initialization errors
    #[error("driver error: {0}")]
    Driver(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quad Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
