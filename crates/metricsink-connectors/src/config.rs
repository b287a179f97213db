//! Provider and state types shared across the pipeline.
//!
//! The service configuration names its broker and storage backends with
//! string keys; those keys resolve to the closed enums here at startup, so
//! an unrecognized provider is a configuration error before any connection
//! is attempted rather than a missing entry in a lookup table at runtime.

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// Message broker backends the pipeline can consume from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerProvider {
    Kafka,
}

impl BrokerProvider {
    /// Resolve a configuration key (case-insensitive).
    pub fn from_key(key: &str) -> Result<Self> {
        match key.to_lowercase().as_str() {
            "kafka" => Ok(BrokerProvider::Kafka),
            other => Err(ConnectorError::ConfigError(format!(
                "unknown broker provider: '{}'",
                other
            ))),
        }
    }
}

/// Relational storage backends the pipeline can persist to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageProvider {
    Postgres,
}

impl StorageProvider {
    /// Resolve a configuration key (case-insensitive).
    pub fn from_key(key: &str) -> Result<Self> {
        match key.to_lowercase().as_str() {
            "postgres" => Ok(StorageProvider::Postgres),
            other => Err(ConnectorError::ConfigError(format!(
                "unknown storage provider: '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of the pipeline runner.
///
/// `Failed` is reserved for unrecoverable setup errors; it is never entered
/// from `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for BrokerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerProvider::Kafka => write!(f, "kafka"),
        }
    }
}

impl std::fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageProvider::Postgres => write!(f, "postgres"),
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "IDLE"),
            PipelineState::Running => write!(f, "RUNNING"),
            PipelineState::Stopped => write!(f, "STOPPED"),
            PipelineState::Failed => write!(f, "FAILED"),
        }
    }
}
