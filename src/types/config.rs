//! Configuration structures.
//!
//! Configuration is loaded once from `NODEFLOW_*` environment variables at
//! process start and then passed explicitly into every constructor.

use super::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "NODEFLOW_";

/// Process configuration for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of this node, stamped as `from_node` on every envelope.
    pub node_id: String,

    /// Workflow identifier (metrics and document tags).
    #[serde(default)]
    pub workflow_id: String,

    /// Version identifier (metrics and document tags).
    #[serde(default)]
    pub version_id: String,

    /// Base filesystem path handlers resolve relative paths against.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Exit adapter only: node whose `OK` output completes a request.
    #[serde(default)]
    pub last_node: Option<String>,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node".to_string(),
            workflow_id: String::new(),
            version_id: String::new(),
            base_path: default_base_path(),
            last_node: None,
            bus: BusConfig::default(),
            storage: StorageConfig::default(),
            documents: DocumentsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus server address.
    pub server: String,

    /// JetStream stream carrying the pipeline subjects.
    pub stream: String,

    /// Subjects this node consumes, one durable queue subscription each.
    pub input_subjects: Vec<String>,

    /// Base output subject; channels are appended as `.{channel}`.
    pub output_subject: String,

    /// Redelivery window for unacknowledged messages.
    #[serde(with = "humantime_serde")]
    pub ack_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            server: "nats://127.0.0.1:4222".to_string(),
            stream: String::new(),
            input_subjects: Vec::new(),
            output_subject: String::new(),
            ack_wait: Duration::from_secs(22 * 60 * 60),
        }
    }
}

/// Scoped KV buckets and the optional object store bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store bucket; `None` leaves blob storage undefined.
    pub object_store: Option<String>,
    pub kv_node: String,
    pub kv_workflow: String,
    pub kv_project: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_store: None,
            kv_node: "node-config".to_string(),
            kv_workflow: "workflow-config".to_string(),
            kv_project: "project-config".to_string(),
        }
    }
}

/// Document writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Subject of the document writer process.
    pub writer_subject: String,

    /// Subject answering document queries.
    #[serde(default = "default_reader_subject")]
    pub reader_subject: String,

    /// Request timeout for a document save.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            writer_subject: "mongo_writer".to_string(),
            reader_subject: default_reader_subject(),
            timeout: Duration::from_secs(1),
        }
    }
}

fn default_reader_subject() -> String {
    "mongo_reader".to_string()
}

/// Metrics sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Line-protocol HTTP endpoint; `None` writes points to the log.
    pub endpoint: Option<String>,

    /// Target database name.
    pub database: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            database: "nodeflow".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Keys are full variable names, e.g. `NODEFLOW_NODE_ID`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| Error::config(format!("missing {ENV_PREFIX}{name}")))
        };
        let duration = |name: &str, default: Duration| -> Result<Duration> {
            match var(name) {
                Some(raw) => humantime_serde::re::humantime::parse_duration(&raw)
                    .map_err(|e| Error::config(format!("invalid {ENV_PREFIX}{name}: {e}"))),
                None => Ok(default),
            }
        };

        let input_subjects: Vec<String> = serde_json::from_str(&required("INPUT_SUBJECTS")?)
            .map_err(|e| Error::config(format!("invalid {ENV_PREFIX}INPUT_SUBJECTS: {e}")))?;

        let bus_defaults = BusConfig::default();
        let storage_defaults = StorageConfig::default();
        let documents_defaults = DocumentsConfig::default();
        let metrics_defaults = MetricsConfig::default();

        let config = Self {
            node_id: required("NODE_ID")?,
            workflow_id: var("WORKFLOW_ID").unwrap_or_default(),
            version_id: var("VERSION_ID").unwrap_or_default(),
            base_path: var("BASE_PATH").map(PathBuf::from).unwrap_or_else(default_base_path),
            last_node: var("LAST_NODE"),
            bus: BusConfig {
                server: var("NATS_SERVER").unwrap_or(bus_defaults.server),
                stream: required("NATS_STREAM")?,
                input_subjects,
                output_subject: required("OUTPUT_SUBJECT")?,
                ack_wait: duration("ACK_WAIT", bus_defaults.ack_wait)?,
            },
            storage: StorageConfig {
                object_store: var("OBJECT_STORE"),
                kv_node: var("KV_NODE").unwrap_or(storage_defaults.kv_node),
                kv_workflow: var("KV_WORKFLOW").unwrap_or(storage_defaults.kv_workflow),
                kv_project: var("KV_PROJECT").unwrap_or(storage_defaults.kv_project),
            },
            documents: DocumentsConfig {
                writer_subject: var("DOCUMENTS_SUBJECT").unwrap_or(documents_defaults.writer_subject),
                reader_subject: var("DOCUMENTS_READER_SUBJECT")
                    .unwrap_or(documents_defaults.reader_subject),
                timeout: duration("DOCUMENTS_TIMEOUT", documents_defaults.timeout)?,
            },
            metrics: MetricsConfig {
                endpoint: var("METRICS_ENDPOINT"),
                database: var("METRICS_DATABASE").unwrap_or(metrics_defaults.database),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::validation("node_id cannot be empty"));
        }
        if self.bus.output_subject.trim().is_empty() {
            return Err(Error::validation("output_subject cannot be empty"));
        }
        if self.bus.input_subjects.is_empty() {
            return Err(Error::validation("at least one input subject is required"));
        }
        if self.bus.input_subjects.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::validation("input subjects cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("NODEFLOW_{k}"), v.to_string()))
            .collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("NODE_ID", "nodeB"),
            ("NATS_STREAM", "pipeline"),
            ("INPUT_SUBJECTS", r#"["pipeline.nodeA","pipeline.entry"]"#),
            ("OUTPUT_SUBJECT", "pipeline.nodeB"),
        ])
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let vars = base_env();
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.node_id, "nodeB");
        assert_eq!(
            config.bus.input_subjects,
            vec!["pipeline.nodeA".to_string(), "pipeline.entry".to_string()]
        );
        assert_eq!(config.bus.ack_wait, Duration::from_secs(22 * 3600));
        assert_eq!(config.documents.timeout, Duration::from_secs(1));
        assert!(config.storage.object_store.is_none());
        assert!(config.metrics.endpoint.is_none());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let mut vars = base_env();
        vars.extend(env(&[
            ("ACK_WAIT", "5m"),
            ("OBJECT_STORE", "blobs"),
            ("METRICS_ENDPOINT", "http://influx:8086"),
        ]));
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.bus.ack_wait, Duration::from_secs(300));
        assert_eq!(config.storage.object_store.as_deref(), Some("blobs"));
        assert_eq!(config.metrics.endpoint.as_deref(), Some("http://influx:8086"));
    }

    #[test]
    fn test_missing_required_variable() {
        let mut vars = base_env();
        vars.remove("NODEFLOW_NODE_ID");
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("NODEFLOW_NODE_ID")));
    }

    #[test]
    fn test_input_subjects_must_be_json_array() {
        let mut vars = base_env();
        vars.insert("NODEFLOW_INPUT_SUBJECTS".into(), "pipeline.nodeA".into());
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());

        vars.insert("NODEFLOW_INPUT_SUBJECTS".into(), "[]".into());
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_serde_humantime_round_trip() {
        let json = r#"{"node_id":"n","bus":{"server":"nats://x","stream":"s","input_subjects":["a"],"output_subject":"b","ack_wait":"22h"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.bus.ack_wait, Duration::from_secs(22 * 3600));
        assert_eq!(config.storage.kv_node, "node-config");
        config.validate().unwrap();
    }
}
