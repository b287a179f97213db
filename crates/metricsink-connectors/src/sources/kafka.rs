//! Kafka consumer session.
//!
//! [`KafkaSession`] wraps an rdkafka `StreamConsumer` behind the
//! [`EventSource`] seam: connect subscribes a uniquely-identified member of
//! the consumer group, `fetch_latest` drains whatever is buffered within a
//! bounded idle window and only then commits offsets, and `change_topics`
//! swaps subscriptions live or pending. Releasing the session is tied to
//! drop, so the broker connection goes away on every exit path — normal
//! return, error, or cancellation.
//!
//! Delivery is at-least-once: a crash between drain and commit causes
//! redelivery on the next fetch, never a silent drop.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Message};
use serde_json::Value;
use tracing;
use uuid::Uuid;

use crate::error::{ConnectorError, Result};
use crate::traits::EventSource;

/// Consumer group shared by all instances of this service.
pub const DEFAULT_GROUP_ID: &str = "web_metrics_consumer";

/// Prefix of the per-instance client id.
const CLIENT_ID_PREFIX: &str = "website-monitoring-consumer-service";

/// Default idle window for a drain: when no new record arrives within this
/// span, the fetch ends with whatever was already buffered.
const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(1);

/// Broker security mode and its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityConfig {
    /// No transport security.
    Plaintext,
    /// TLS with a client certificate.
    Ssl {
        ca_location: String,
        certificate_location: String,
        key_location: String,
    },
    /// SASL PLAIN username/password.
    SaslPlain { username: String, password: String },
}

/// Parsed configuration for a Kafka session.
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Broker addresses, comma-separated `host:port` pairs.
    pub bootstrap_servers: String,
    /// Consumer group id.
    pub group_id: String,
    /// Initial topic subscription.
    pub topics: Vec<String>,
    /// Security mode.
    pub security: SecurityConfig,
    /// Idle window bounding each drain.
    pub poll_window: Duration,
}

impl KafkaSourceConfig {
    pub fn new(bootstrap_servers: &str, topics: Vec<String>, security: SecurityConfig) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            topics,
            security,
            poll_window: DEFAULT_POLL_WINDOW,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConnectorError::ConfigError(
                "bootstrap servers must not be empty".to_string(),
            ));
        }
        if self.topics.is_empty() {
            return Err(ConnectorError::ConfigError(
                "at least one topic is required".to_string(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConnectorError::ConfigError(
                "group id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A scoped consumer-group session.
pub struct KafkaSession {
    config: KafkaSourceConfig,
    topics: Vec<String>,
    client_id: String,
    consumer: Option<StreamConsumer>,
}

impl KafkaSession {
    /// Create an unconnected session. The connection is established by
    /// [`KafkaSession::connect`], not here.
    pub fn new(config: KafkaSourceConfig) -> Result<Self> {
        config.validate()?;
        let topics = config.topics.clone();
        Ok(Self {
            config,
            topics,
            client_id: format!("{}:{}", CLIENT_ID_PREFIX, Uuid::new_v4()),
            consumer: None,
        })
    }

    /// The topic set the next fetch (or connect) will use.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Unique client identity of this instance.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_some()
    }

    /// Client properties handed to the underlying consumer.
    fn properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = BTreeMap::new();
        props.insert("bootstrap.servers", self.config.bootstrap_servers.clone());
        props.insert("group.id", self.config.group_id.clone());
        props.insert("client.id", self.client_id.clone());
        props.insert("enable.auto.commit", "false".to_string());
        props.insert("auto.offset.reset", "earliest".to_string());

        match &self.config.security {
            SecurityConfig::Plaintext => {
                props.insert("security.protocol", "plaintext".to_string());
            }
            SecurityConfig::Ssl {
                ca_location,
                certificate_location,
                key_location,
            } => {
                props.insert("security.protocol", "ssl".to_string());
                props.insert("ssl.ca.location", ca_location.clone());
                props.insert("ssl.certificate.location", certificate_location.clone());
                props.insert("ssl.key.location", key_location.clone());
            }
            SecurityConfig::SaslPlain { username, password } => {
                props.insert("security.protocol", "sasl_plaintext".to_string());
                props.insert("sasl.mechanism", "PLAIN".to_string());
                props.insert("sasl.username", username.clone());
                props.insert("sasl.password", password.clone());
            }
        }

        props
    }

    /// Establish the broker connection and subscribe to the current topic
    /// set. Failures propagate — the session stays unconnected.
    pub async fn connect(&mut self) -> Result<()> {
        let mut client_config = ClientConfig::new();
        for (key, value) in self.properties() {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            ConnectorError::BrokerError(format!(
                "failed to create consumer for {}: {}",
                self.config.bootstrap_servers, e
            ))
        })?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs).map_err(|e| {
            ConnectorError::BrokerError(format!("failed to subscribe to {:?}: {}", self.topics, e))
        })?;

        tracing::info!(
            uri = %self.config.bootstrap_servers,
            topics = ?self.topics,
            client_id = %self.client_id,
            "connected to kafka broker"
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Drain all records buffered since the last committed offset, decode
    /// them, then commit.
    ///
    /// The drain ends when no record arrives within the configured idle
    /// window; an empty batch is a normal outcome, not an error.
    pub async fn fetch_latest(&mut self) -> Result<Vec<Value>> {
        let consumer = self.consumer.as_ref().ok_or_else(|| {
            ConnectorError::BrokerError("fetch on a session that is not connected".to_string())
        })?;

        let mut batch = Vec::new();
        loop {
            match tokio::time::timeout(self.config.poll_window, consumer.recv()).await {
                Ok(Ok(message)) => {
                    batch.push(decode_payload(message.payload().unwrap_or_default())?);
                }
                Ok(Err(e)) => {
                    return Err(ConnectorError::BrokerError(format!("poll failed: {}", e)));
                }
                // Idle window elapsed: the drain is complete.
                Err(_) => break,
            }
        }

        // Commit only after the full drain; a crash before this point
        // causes redelivery on the next fetch.
        if let Err(e) = consumer.commit_consumer_state(CommitMode::Sync) {
            if !matches!(e, KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) {
                return Err(ConnectorError::BrokerError(format!(
                    "offset commit failed: {}",
                    e
                )));
            }
        }

        tracing::info!(
            count = batch.len(),
            uri = %self.config.bootstrap_servers,
            "fetched messages from broker"
        );
        Ok(batch)
    }

    /// Replace the topic subscription.
    ///
    /// When the session is live this unsubscribes and resubscribes
    /// immediately; the underlying client does not make that swap atomic,
    /// so messages in flight during it may be lost. When not connected,
    /// the pending set is replaced and used by the next connect.
    pub fn change_topics(&mut self, topics: Vec<String>) -> Result<()> {
        if topics.is_empty() {
            return Err(ConnectorError::ConfigError(
                "topic change requires at least one topic".to_string(),
            ));
        }
        self.topics = topics;

        if let Some(consumer) = &self.consumer {
            consumer.unsubscribe();
            let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| {
                ConnectorError::BrokerError(format!(
                    "failed to resubscribe to {:?}: {}",
                    self.topics, e
                ))
            })?;
            tracing::info!(topics = ?self.topics, "switched live subscription");
        }
        Ok(())
    }

    /// Release the broker connection. Safe to call on a session that never
    /// connected or only partially connected.
    pub fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            tracing::info!(uri = %self.config.bootstrap_servers, "closed connection to kafka broker");
        }
    }
}

impl Drop for KafkaSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl EventSource for KafkaSession {
    async fn connect(&mut self) -> Result<()> {
        KafkaSession::connect(self).await
    }

    async fn fetch_latest(&mut self) -> Result<Vec<Value>> {
        KafkaSession::fetch_latest(self).await
    }

    fn change_topics(&mut self, topics: Vec<String>) -> Result<()> {
        KafkaSession::change_topics(self, topics)
    }
}

/// Decode one wire payload: UTF-8 text carrying a JSON value.
fn decode_payload(payload: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(payload).map_err(|e| {
        ConnectorError::SerializationError(format!("message payload is not UTF-8: {}", e))
    })?;
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> KafkaSourceConfig {
        KafkaSourceConfig::new(
            "localhost:9092",
            vec!["website-metrics".to_string()],
            SecurityConfig::Plaintext,
        )
    }

    // ---------------------------------------------------------------
    // Config validation
    // ---------------------------------------------------------------

    #[test]
    fn test_config_defaults() {
        let config = base_config();
        assert_eq!(config.group_id, DEFAULT_GROUP_ID);
        assert_eq!(config.poll_window, Duration::from_secs(1));
    }

    #[test]
    fn test_session_rejects_empty_bootstrap_servers() {
        let mut config = base_config();
        config.bootstrap_servers = "  ".to_string();
        assert!(KafkaSession::new(config).is_err());
    }

    #[test]
    fn test_session_rejects_empty_topics() {
        let mut config = base_config();
        config.topics.clear();
        assert!(KafkaSession::new(config).is_err());
    }

    #[test]
    fn test_session_rejects_empty_group_id() {
        let mut config = base_config();
        config.group_id = String::new();
        assert!(KafkaSession::new(config).is_err());
    }

    // ---------------------------------------------------------------
    // Client identity
    // ---------------------------------------------------------------

    #[test]
    fn test_client_id_is_unique_per_instance() {
        let a = KafkaSession::new(base_config()).unwrap();
        let b = KafkaSession::new(base_config()).unwrap();
        assert_ne!(a.client_id(), b.client_id());
        assert!(a.client_id().starts_with(CLIENT_ID_PREFIX));
        assert!(b.client_id().starts_with(CLIENT_ID_PREFIX));
    }

    // ---------------------------------------------------------------
    // Client properties
    // ---------------------------------------------------------------

    #[test]
    fn test_properties_plaintext() {
        let session = KafkaSession::new(base_config()).unwrap();
        let props = session.properties();
        assert_eq!(props["bootstrap.servers"], "localhost:9092");
        assert_eq!(props["group.id"], DEFAULT_GROUP_ID);
        assert_eq!(props["enable.auto.commit"], "false");
        assert_eq!(props["auto.offset.reset"], "earliest");
        assert_eq!(props["security.protocol"], "plaintext");
        assert!(!props.contains_key("sasl.mechanism"));
    }

    #[test]
    fn test_properties_ssl() {
        let mut config = base_config();
        config.security = SecurityConfig::Ssl {
            ca_location: "/certs/ca.pem".to_string(),
            certificate_location: "/certs/service.cert".to_string(),
            key_location: "/certs/service.key".to_string(),
        };
        let session = KafkaSession::new(config).unwrap();
        let props = session.properties();
        assert_eq!(props["security.protocol"], "ssl");
        assert_eq!(props["ssl.ca.location"], "/certs/ca.pem");
        assert_eq!(props["ssl.certificate.location"], "/certs/service.cert");
        assert_eq!(props["ssl.key.location"], "/certs/service.key");
    }

    #[test]
    fn test_properties_sasl_plain() {
        let mut config = base_config();
        config.security = SecurityConfig::SaslPlain {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let session = KafkaSession::new(config).unwrap();
        let props = session.properties();
        assert_eq!(props["security.protocol"], "sasl_plaintext");
        assert_eq!(props["sasl.mechanism"], "PLAIN");
        assert_eq!(props["sasl.username"], "admin");
        assert_eq!(props["sasl.password"], "secret");
    }

    // ---------------------------------------------------------------
    // Topic subscription
    // ---------------------------------------------------------------

    #[test]
    fn test_change_topics_before_connect_replaces_pending_set() {
        let mut session = KafkaSession::new(base_config()).unwrap();
        assert_eq!(session.topics(), ["website-metrics"]);

        session
            .change_topics(vec!["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(session.topics(), ["a", "b"]);
        // Still not connected: the new set only applies to the next connect.
        assert!(!session.is_connected());
    }

    #[test]
    fn test_change_topics_rejects_empty_set() {
        let mut session = KafkaSession::new(base_config()).unwrap();
        assert!(session.change_topics(vec![]).is_err());
        assert_eq!(session.topics(), ["website-metrics"]);
    }

    // ---------------------------------------------------------------
    // Lifecycle guards
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_on_unconnected_session_fails() {
        let mut session = KafkaSession::new(base_config()).unwrap();
        let result = session.fetch_latest().await;
        match result {
            Err(ConnectorError::BrokerError(_)) => {}
            other => panic!("expected BrokerError, got {:?}", other),
        }
    }

    #[test]
    fn test_close_without_connect_is_safe() {
        let mut session = KafkaSession::new(base_config()).unwrap();
        session.close();
        session.close();
        assert!(!session.is_connected());
    }

    // ---------------------------------------------------------------
    // Payload decoding
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_payload_valid_json() {
        let value = decode_payload(br#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(value["url"], "https://example.com");
    }

    #[test]
    fn test_decode_payload_invalid_utf8() {
        let result = decode_payload(&[0xff, 0xfe]);
        match result {
            Err(ConnectorError::SerializationError(_)) => {}
            other => panic!("expected SerializationError, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_payload_invalid_json() {
        let result = decode_payload(b"not json");
        match result {
            Err(ConnectorError::SerializationError(_)) => {}
            other => panic!("expected SerializationError, got {:?}", other),
        }
    }
}
