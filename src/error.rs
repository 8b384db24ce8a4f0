/// Unified error handling for the fabrica cache
///
/// This module provides the error type system for the fabrica topology
/// cache, covering connection establishment, the metadata dump protocol,
/// configuration, and cache registry usage errors.

use std::io;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Main error type for fabrica operations
#[derive(Debug, Error)]
pub enum FabricaError {
    /// Transport or authentication failure while establishing a connection
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Metadata fetch errors (response violates the dump protocol)
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A cache with the given name was already initialized
    #[error("Cache '{0}' is already initialized")]
    CacheExists(String),

    /// No cache with the given name was initialized
    #[error("Cache '{0}' is not initialized")]
    UnknownCache(String),
}

/// Errors raised while establishing a connection to the metadata server.
///
/// These are never surfaced out of a refresh cycle; the connection
/// manager absorbs them in its retry loop and logs with throttling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connect timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Unexpected handshake reply: {reply}")]
    BadHandshake { reply: String },
}

/// Errors raised while fetching metadata from the server.
///
/// The call reached the server but the response violates the expected
/// result-set protocol. A refresh cycle that hits one of these is a
/// no-op: the previous snapshot stays published.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("CALL statement failed: {procedure}: {message}")]
    CallFailed { procedure: String, message: String },

    #[error("Failed fetching row: {procedure}")]
    MissingInstanceRow { procedure: String },

    #[error("Failed fetching next result: {procedure}")]
    MissingResultSet { procedure: String },

    #[error("Malformed response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection lost during fetch: {0}")]
    Io(#[from] io::Error),
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for fabrica operations
pub type FabricaResult<T> = Result<T, FabricaError>;

impl MetadataError {
    /// Create a call-failure error
    pub fn call_failed<S: Into<String>>(procedure: S, message: S) -> Self {
        MetadataError::CallFailed {
            procedure: procedure.into(),
            message: message.into(),
        }
    }
}
