//! Metric sinks.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{MetricsSink, Point};
use crate::types::{Config, Error, Result};

/// Sink for the configuration: HTTP line protocol when an endpoint is set,
/// otherwise the log.
pub fn sink_from_config(config: &Config) -> Result<Arc<dyn MetricsSink>> {
    match &config.metrics.endpoint {
        Some(endpoint) => Ok(Arc::new(LineProtocolSink::new(
            endpoint,
            &config.metrics.database,
        )?)),
        None => Ok(Arc::new(LogSink)),
    }
}

/// Writes points to the tracing log at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn write(&self, point: Point) -> Result<()> {
        tracing::debug!(target: "nodeflow::metrics", "{}", point.to_line_protocol());
        Ok(())
    }
}

/// Keeps points in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    points: Arc<RwLock<Vec<Point>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn points(&self) -> Vec<Point> {
        self.points.read().await.clone()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn write(&self, point: Point) -> Result<()> {
        self.points.write().await.push(point);
        Ok(())
    }
}

/// POSTs line protocol to `{endpoint}/write?db={database}`.
#[derive(Debug, Clone)]
pub struct LineProtocolSink {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl LineProtocolSink {
    pub fn new(endpoint: &str, database: &str) -> Result<Self> {
        let mut url = reqwest::Url::parse(endpoint)
            .and_then(|base| base.join("write"))
            .map_err(|e| Error::config(format!("invalid metrics endpoint {endpoint:?}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("db", database)
            .append_pair("precision", "ns");

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl MetricsSink for LineProtocolSink {
    async fn write(&self, point: Point) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .body(point.to_line_protocol())
            .send()
            .await
            .map_err(|e| Error::metrics(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::metrics(format!("metrics endpoint returned {status}")));
        }
        Ok(())
    }
}
