//! Capability traits the pipeline runtime drives.
//!
//! The runtime only needs two things from the outside world: a source that
//! yields batches of decoded events and swaps topic subscriptions, and a
//! sink that persists a batch. Concrete implementations (`KafkaSession`,
//! `PostgresSink`) are bound at startup from the closed provider enums in
//! [`crate::config`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::sinks::postgres::MetricRow;

/// A source of decoded monitoring events.
#[async_trait]
pub trait EventSource: Send {
    /// Establish the underlying connection. Failures propagate — no
    /// further operation is meaningful without a live session.
    async fn connect(&mut self) -> Result<()>;

    /// Fetch all records buffered since the last committed offset.
    ///
    /// Returns an empty vec when nothing arrived within the source's idle
    /// window. Offsets are committed only after the drain, so a crash
    /// in between causes redelivery rather than loss.
    async fn fetch_latest(&mut self) -> Result<Vec<Value>>;

    /// Replace the topic subscription. Takes effect on the next fetch when
    /// the session is live, or on the next connect otherwise.
    fn change_topics(&mut self, topics: Vec<String>) -> Result<()>;
}

/// A sink that persists batches of events.
#[async_trait]
pub trait EventSink: Send {
    /// Prepare the destination (create schema/table if absent).
    async fn start(&mut self) -> Result<()>;

    /// Map and persist a batch, returning the rows the store confirmed.
    ///
    /// `Ok(None)` means no confirmed effect: empty input, or a storage
    /// failure that was logged and swallowed. `Err` is reserved for batch
    /// rejection (e.g. a malformed event), which the caller logs before
    /// continuing with the next cycle.
    async fn persist(&mut self, events: &[Value]) -> Result<Option<Vec<MetricRow>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSource;

    #[async_trait]
    impl EventSource for NullSource {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn fetch_latest(&mut self) -> Result<Vec<Value>> {
            Ok(vec![])
        }
        fn change_topics(&mut self, _topics: Vec<String>) -> Result<()> {
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn persist(&mut self, _events: &[Value]) -> Result<Option<Vec<MetricRow>>> {
            Ok(None)
        }
    }

    // Object safety: the runtime holds sources and sinks as trait objects.

    #[test]
    fn test_event_source_object_safety() {
        let source = NullSource;
        let _: &dyn EventSource = &source;
    }

    #[test]
    fn test_event_sink_object_safety() {
        let sink = NullSink;
        let _: &dyn EventSink = &sink;
    }

    #[tokio::test]
    async fn test_null_source_lifecycle() {
        let mut source = NullSource;
        source.connect().await.unwrap();
        assert!(source.fetch_latest().await.unwrap().is_empty());
        source.change_topics(vec!["t".to_string()]).unwrap();
    }

    #[tokio::test]
    async fn test_null_sink_lifecycle() {
        let mut sink = NullSink;
        sink.start().await.unwrap();
        assert!(sink.persist(&[]).await.unwrap().is_none());
    }
}
