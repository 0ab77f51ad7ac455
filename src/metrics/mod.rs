//! Metrics points and the handler-facing measurement facade.
//!
//! Points are written to a [`MetricsSink`]; sinks live in [`sinks`]. Metric
//! writes never fail a message: errors are logged and dropped by
//! [`Measurement::record`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use crate::types::{Config, Result};

pub mod sinks;

pub use sinks::{sink_from_config, LineProtocolSink, LogSink, MemorySink};

/// Elapsed-time measurement written once per processed message.
pub const ELAPSED_TIME_MEASUREMENT: &str = "node_elapsed_time";

/// Field value of a point.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// One measurement sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Influx line protocol with a nanosecond timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        let _ = write!(line, " {}", fields.join(","));

        if let Some(nanos) = self.timestamp.timestamp_nanos_opt() {
            let _ = write!(line, " {nanos}");
        }
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Destination for metric points.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, point: Point) -> Result<()>;
}

/// Measurement facade handed to handlers.
///
/// Every point is tagged with the node's `version`, `workflow` and `node`.
#[derive(Clone)]
pub struct Measurement {
    sink: Arc<dyn MetricsSink>,
    default_tags: BTreeMap<String, String>,
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("default_tags", &self.default_tags)
            .finish_non_exhaustive()
    }
}

impl Measurement {
    pub fn new(sink: Arc<dyn MetricsSink>, config: &Config) -> Self {
        let default_tags = BTreeMap::from([
            ("version".to_string(), config.version_id.clone()),
            ("workflow".to_string(), config.workflow_id.clone()),
            ("node".to_string(), config.node_id.clone()),
        ]);
        Self { sink, default_tags }
    }

    /// Write one point named `measurement`.
    pub async fn save(
        &self,
        measurement: &str,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut point = Point::new(measurement);
        point.fields = fields;
        point.tags = tags;
        self.write(point).await
    }

    async fn write(&self, mut point: Point) -> Result<()> {
        for (key, value) in &self.default_tags {
            point.tags.insert(key.clone(), value.clone());
        }
        self.sink.write(point).await
    }

    /// Write `point`, logging instead of returning failures.
    pub async fn record(&self, point: Point) {
        let measurement = point.measurement.clone();
        if let Err(e) = self.write(point).await {
            tracing::warn!(measurement = %measurement, "Metric write failed: {}", e);
        }
    }
}
