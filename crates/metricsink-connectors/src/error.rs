//! Error types for the metricsink connectors.
//!
//! Provides a unified error type covering configuration resolution, record
//! mapping, statement construction guards, storage execution, and broker I/O.

use thiserror::Error;

/// Errors that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration. Fatal before startup completes.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A fetched event is missing a required field. Aborts the batch's
    /// insert; the pipeline continues with the next cycle.
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// A statement that must never be constructible was requested, e.g.
    /// a DELETE with no filter criteria.
    #[error("Guard error: {0}")]
    GuardError(String),

    /// Statement execution failed at the storage layer.
    #[error("Statement error: {0}")]
    StatementError(String),

    /// Statement ran but its result rows could not be fetched or decoded.
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// Broker connection or consume failure.
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Payload could not be decoded from its wire encoding.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error (file, network, etc).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::SerializationError(e.to_string())
    }
}
