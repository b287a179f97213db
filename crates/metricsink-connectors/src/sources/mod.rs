//! Source implementations.
//!
//! Currently a single source: Kafka, the only broker provider in the
//! closed provider set.

pub mod kafka;

pub use kafka::{KafkaSession, KafkaSourceConfig, SecurityConfig};
