//! Service configuration.
//!
//! Configuration is resolved in layers: a base `service.yaml`, an optional
//! `service.local.yaml` override (maps merge recursively, lists
//! concatenate, scalars replace), and environment variables carrying the
//! provider selection and every credential. Resolution happens once at
//! startup and produces an immutable [`ResolvedConfig`]; anything missing
//! or contradictory is a `ConfigError` before any connection is attempted.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use metricsink_connectors::error::{ConnectorError, Result};
use metricsink_connectors::{
    BrokerProvider, ConnectionParams, KafkaSourceConfig, SecurityConfig, StorageProvider,
};

pub const DEFAULT_TOPIC: &str = "website-metrics";
pub const DEFAULT_SCHEMA: &str = "web_metrics";
pub const DEFAULT_TABLE: &str = "metrics";

/// Raw document shape of `service.yaml`.
#[derive(Debug, Deserialize)]
pub struct ServiceSettings {
    #[serde(rename = "Metrics collection endpoint")]
    pub collection: HashMap<String, CollectionEndpoint>,
    #[serde(rename = "Metrics storage endpoint")]
    pub storage: HashMap<String, StorageEndpoint>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionEndpoint {
    pub broker: BrokerSettings,
}

#[derive(Debug, Deserialize)]
pub struct BrokerSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub auth: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct StorageEndpoint {
    #[serde(rename = "upload every")]
    pub upload_every: u64,
    pub db: DbSettings,
}

#[derive(Debug, Deserialize)]
pub struct DbSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub auth: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// Validated, immutable configuration the service runs with.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub broker: KafkaSourceConfig,
    pub storage: ConnectionParams,
    pub sleep_interval: Duration,
}

/// Merge an override document into a base document.
///
/// Maps merge key-by-key recursively; two lists concatenate; a non-null
/// scalar appended to a list extends it; a null override keeps the base
/// value; anything else is replaced by the override.
pub fn merge_yaml(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_yaml(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (Value::Sequence(mut base_seq), Value::Sequence(overlay_seq)) => {
            base_seq.extend(overlay_seq);
            Value::Sequence(base_seq)
        }
        (base, Value::Null) => base,
        (Value::Sequence(mut base_seq), overlay) => {
            base_seq.push(overlay);
            Value::Sequence(base_seq)
        }
        (_, overlay) => overlay,
    }
}

/// Load `service.yaml` from `config_dir`, merged with
/// `service.local.yaml` when one is present.
pub fn load_layered(config_dir: &Path) -> Result<ServiceSettings> {
    let base_path = config_dir.join("service.yaml");
    let base_text = std::fs::read_to_string(&base_path).map_err(|e| {
        ConnectorError::ConfigError(format!("cannot read {}: {}", base_path.display(), e))
    })?;
    let mut document: Value = serde_yaml::from_str(&base_text)
        .map_err(|e| ConnectorError::ConfigError(format!("{}: {}", base_path.display(), e)))?;

    let local_path = config_dir.join("service.local.yaml");
    if local_path.exists() {
        let local_text = std::fs::read_to_string(&local_path).map_err(|e| {
            ConnectorError::ConfigError(format!("cannot read {}: {}", local_path.display(), e))
        })?;
        let overlay: Value = serde_yaml::from_str(&local_text)
            .map_err(|e| ConnectorError::ConfigError(format!("{}: {}", local_path.display(), e)))?;
        document = merge_yaml(document, overlay);
    }

    serde_yaml::from_value(document)
        .map_err(|e| ConnectorError::ConfigError(format!("invalid service configuration: {}", e)))
}

/// Resolve providers, endpoints and credentials into a [`ResolvedConfig`].
///
/// `env` is the process environment (passed explicitly so resolution is
/// testable without mutating global state).
pub fn resolve(settings: &ServiceSettings, env: &HashMap<String, String>) -> Result<ResolvedConfig> {
    let collection_key = require(env, "BROKER_SERVICE_PROVIDER")?;
    let endpoint = settings.collection.get(collection_key).ok_or_else(|| {
        ConnectorError::ConfigError(format!(
            "no 'Metrics collection endpoint' entry for provider '{}'",
            collection_key
        ))
    })?;
    // Closed provider set: the only broker backend today is Kafka.
    BrokerProvider::from_key(&endpoint.broker.kind)?;

    let security = broker_security(&endpoint.broker.auth, env)?;
    let bootstrap = format!("{}:{}", endpoint.broker.host, endpoint.broker.port);
    let broker = KafkaSourceConfig::new(&bootstrap, vec![DEFAULT_TOPIC.to_string()], security);

    let storage_key = require(env, "STORAGE_SERVICE_PROVIDER")?;
    let storage_endpoint = settings.storage.get(storage_key).ok_or_else(|| {
        ConnectorError::ConfigError(format!(
            "no 'Metrics storage endpoint' entry for provider '{}'",
            storage_key
        ))
    })?;
    StorageProvider::from_key(&storage_endpoint.db.kind)?;

    let storage = storage_params(&storage_endpoint.db, env)?;

    Ok(ResolvedConfig {
        broker,
        storage,
        sleep_interval: Duration::from_secs(storage_endpoint.upload_every),
    })
}

fn broker_security(auth: &str, env: &HashMap<String, String>) -> Result<SecurityConfig> {
    match auth {
        "none" => Ok(SecurityConfig::Plaintext),
        "sasl_plain" => Ok(SecurityConfig::SaslPlain {
            username: require(env, "BROKER_USERNAME")?.to_string(),
            password: require(env, "BROKER_PASSWORD")?.to_string(),
        }),
        "client_cert" => Ok(SecurityConfig::Ssl {
            ca_location: require(env, "BROKER_CA_CERT")?.to_string(),
            certificate_location: require(env, "BROKER_SERVICE_CERT")?.to_string(),
            key_location: require(env, "BROKER_SERVICE_KEY")?.to_string(),
        }),
        other => Err(ConnectorError::ConfigError(format!(
            "unrecognized broker auth mode: '{}'",
            other
        ))),
    }
}

fn storage_params(db: &DbSettings, env: &HashMap<String, String>) -> Result<ConnectionParams> {
    match db.auth.as_str() {
        "basic" => Ok(ConnectionParams {
            host: db.host.clone(),
            port: db.port,
            user: require(env, "DB_LOGIN")?.to_string(),
            password: require(env, "DB_PASS")?.to_string(),
            database: db.database.clone(),
        }),
        other => Err(ConnectorError::ConfigError(format!(
            "unrecognized storage auth mode: '{}'",
            other
        ))),
    }
}

fn require<'a>(env: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    env.get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ConnectorError::ConfigError(format!(
                "required environment variable {} is not set",
                key
            ))
        })
}
