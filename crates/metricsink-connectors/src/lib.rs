//! metricsink Connectors
//!
//! Building blocks for the website-metrics consume-transform-persist
//! pipeline: a Kafka source session, a PostgreSQL sink, the record-to-row
//! mapping and SQL construction in between, and the runtime that drives
//! the poll → map → persist cycle.
//!
//! ## Architecture
//!
//! - **Traits**: `EventSource` and `EventSink` define the capability seams
//!   the runtime drives.
//! - **Record**: maps one decoded JSON event into an ordered row keyed by
//!   destination column names.
//! - **Sql**: builds parameterized INSERT / DELETE / CREATE statements.
//! - **Sources**: `KafkaSession`, a scoped consumer-group session with
//!   manual offset commits (at-least-once delivery).
//! - **Sinks**: `PostgresSink`, opening one connection per operation and
//!   classifying storage failures into a typed outcome.
//! - **Runtime**: `PipelineRunner`, the bounded, interruptible cycle loop.

pub mod config;
pub mod error;
pub mod record;
pub mod runtime;
pub mod sinks;
pub mod sources;
pub mod sql;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use config::{BrokerProvider, PipelineState, StorageProvider};
pub use error::{ConnectorError, Result};
pub use record::{map_event, FieldValue, MappedRow};
pub use runtime::{PipelineConfig, PipelineRunner};
pub use sinks::postgres::{ConnectionParams, ExecOutcome, MetricRow, PostgresSink};
pub use sources::kafka::{KafkaSession, KafkaSourceConfig, SecurityConfig};
pub use sql::Statement;
pub use traits::{EventSink, EventSource};
