//! Sink implementations.
//!
//! Currently a single sink: PostgreSQL, the only storage provider in the
//! closed provider set.

pub mod postgres;

pub use postgres::{ConnectionParams, ExecOutcome, MetricRow, PostgresGateway, PostgresSink};
