//! Document writer client.
//!
//! Documents are sent as `{"coll": .., "doc": ..}` JSON requests to the
//! document writer subject and wait for its reply. Queries go out as
//! `{"coll": .., "query": ..}` to the reader subject, which answers with a
//! JSON array of matching documents.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::commbus::MessageBus;
use crate::types::{Config, DocumentsConfig, Result};

/// Collection receiving classification metrics.
pub const CLASSIFICATION_METRICS: &str = "classificationMetrics";

/// Failure kinds recorded in place of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionError {
    MissingValues,
    NewLabels,
}

impl PredictionError {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionError::MissingValues => "missing_values",
            PredictionError::NewLabels => "new_labels",
        }
    }
}

#[derive(Debug, Serialize)]
struct SaveRequest<'a, T: Serialize> {
    coll: &'a str,
    doc: &'a T,
}

#[derive(Debug, Serialize)]
struct FindRequest<'a> {
    coll: &'a str,
    query: &'a QueryData,
}

/// Field equality criteria for [`Documents::find`].
pub type QueryData = serde_json::Map<String, serde_json::Value>;

/// One classification-metric document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionDoc {
    pub date: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub predicted_value: String,
    #[serde(default)]
    pub true_value: String,
    pub workflow_id: String,
    pub version_id: String,
    pub node_id: String,
}

#[derive(Clone)]
pub struct Documents {
    bus: Arc<dyn MessageBus>,
    config: DocumentsConfig,
    workflow_id: String,
    version_id: String,
    node_id: String,
}

impl fmt::Debug for Documents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Documents")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Documents {
    pub fn new(bus: Arc<dyn MessageBus>, config: &Config) -> Self {
        Self {
            bus,
            config: config.documents.clone(),
            workflow_id: config.workflow_id.clone(),
            version_id: config.version_id.clone(),
            node_id: config.node_id.clone(),
        }
    }

    /// Save `doc` into `collection`.
    pub async fn save<T: Serialize + Sync>(&self, collection: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_vec(&SaveRequest {
            coll: collection,
            doc,
        })?;

        self.bus
            .request(
                &self.config.writer_subject,
                Bytes::from(body),
                self.config.timeout,
            )
            .await?;

        tracing::debug!(collection = %collection, "Document saved");
        Ok(())
    }

    /// Documents of `collection` matching every field of `query`.
    pub async fn find<T: DeserializeOwned>(&self, collection: &str, query: &QueryData) -> Result<Vec<T>> {
        let body = serde_json::to_vec(&FindRequest {
            coll: collection,
            query,
        })?;

        let reply = self
            .bus
            .request(
                &self.config.reader_subject,
                Bytes::from(body),
                self.config.timeout,
            )
            .await?;

        let docs: Vec<T> = serde_json::from_slice(&reply)?;
        tracing::debug!(collection = %collection, found = docs.len(), "Documents found");
        Ok(docs)
    }

    /// Record a prediction with its ground truth.
    pub async fn save_prediction(
        &self,
        date: DateTime<Utc>,
        predicted_value: &str,
        true_value: &str,
    ) -> Result<()> {
        let doc = PredictionDoc {
            date: date.to_rfc3339_opts(SecondsFormat::Secs, true),
            predicted_value: predicted_value.to_string(),
            true_value: true_value.to_string(),
            ..self.prediction_doc()
        };
        self.save(CLASSIFICATION_METRICS, &doc).await
    }

    /// Record a prediction that could not be made.
    pub async fn save_prediction_error(&self, error: PredictionError) -> Result<()> {
        let doc = PredictionDoc {
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            error: error.as_str().to_string(),
            ..self.prediction_doc()
        };
        self.save(CLASSIFICATION_METRICS, &doc).await
    }

    fn prediction_doc(&self) -> PredictionDoc {
        PredictionDoc {
            workflow_id: self.workflow_id.clone(),
            version_id: self.version_id.clone(),
            node_id: self.node_id.clone(),
            ..PredictionDoc::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commbus::InMemoryBus;
    use crate::types::Error;
    use chrono::TimeZone;

    fn setup() -> (Documents, InMemoryBus) {
        let bus = InMemoryBus::new();
        let config = Config {
            node_id: "nodeB".into(),
            workflow_id: "wf".into(),
            version_id: "v1".into(),
            ..Config::default()
        };
        (Documents::new(Arc::new(bus.clone()), &config), bus)
    }

    #[tokio::test]
    async fn test_save_sends_coll_and_doc() {
        let (documents, bus) = setup();
        bus.respond_with("mongo_writer", |_| Ok(Bytes::from_static(b"ok")))
            .await;

        documents
            .save("results", &serde_json::json!({"score": 3}))
            .await
            .unwrap();

        let requests = bus.requests().await;
        assert_eq!(requests[0].subject, "mongo_writer");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].payload).unwrap();
        assert_eq!(body, serde_json::json!({"coll": "results", "doc": {"score": 3}}));
    }

    #[tokio::test]
    async fn test_save_prediction() {
        let (documents, bus) = setup();
        bus.respond_with("mongo_writer", |_| Ok(Bytes::new())).await;

        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        documents.save_prediction(date, "cat", "dog").await.unwrap();
        documents
            .save_prediction_error(PredictionError::NewLabels)
            .await
            .unwrap();

        let requests = bus.requests().await;
        let first: serde_json::Value = serde_json::from_slice(&requests[0].payload).unwrap();
        assert_eq!(first["coll"], CLASSIFICATION_METRICS);
        assert_eq!(first["doc"]["date"], "2024-05-01T12:00:00Z");
        assert_eq!(first["doc"]["predictedValue"], "cat");
        assert_eq!(first["doc"]["trueValue"], "dog");
        assert_eq!(first["doc"]["versionId"], "v1");

        let second: serde_json::Value = serde_json::from_slice(&requests[1].payload).unwrap();
        assert_eq!(second["doc"]["error"], "new_labels");
    }

    #[tokio::test]
    async fn test_writer_unavailable() {
        let (documents, _bus) = setup();
        let err = documents.save("results", &1).await.unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }

    #[tokio::test]
    async fn test_find_sends_query_and_parses_reply() {
        let (documents, bus) = setup();
        bus.respond_with("mongo_reader", |_| {
            Ok(Bytes::from_static(br#"[{"score":3},{"score":5}]"#))
        })
        .await;

        let mut query = QueryData::new();
        query.insert("label".into(), serde_json::json!("cat"));
        let docs: Vec<serde_json::Value> = documents.find("results", &query).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["score"], 5);
        let requests = bus.requests().await;
        assert_eq!(requests[0].subject, "mongo_reader");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].payload).unwrap();
        assert_eq!(body, serde_json::json!({"coll": "results", "query": {"label": "cat"}}));
    }

    #[tokio::test]
    async fn test_find_rejects_malformed_reply() {
        let (documents, bus) = setup();
        bus.respond_with("mongo_reader", |_| Ok(Bytes::from_static(b"not json")))
            .await;

        let err = documents
            .find::<serde_json::Value>("results", &QueryData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
