//! Message bus seam for node intake and output.
//!
//! The runtime talks to the bus only through [`MessageBus`]:
//!   - **Publish**: fire-and-forget envelope output to a subject
//!   - **Subscribe**: durable, queue-grouped intake with manual acknowledgment
//!   - **Request**: request/response with timeout (document writer)
//!   - **Limits**: stream and transport payload caps
//!
//! Two implementations ship with the crate: [`InMemoryBus`] for tests and
//! single-process pipelines, and [`nats::NatsBus`] on NATS JetStream.

use crate::types::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Duration;

pub mod nats;

// =============================================================================
// Seam
// =============================================================================

/// Stream of raw deliveries for one subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Manual acknowledgment of one delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// One raw bus message awaiting processing and acknowledgment.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(subject: impl Into<String>, payload: Bytes, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Payload caps imposed by the stream and by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    /// Stream-configured max message size; `None` when the stream sets no limit.
    pub stream_max: Option<usize>,
    /// Server-advertised max payload.
    pub transport_max: usize,
}

impl PayloadLimits {
    /// `min(stream_max, transport_max)`, or `transport_max` without a stream limit.
    pub fn effective(&self) -> usize {
        match self.stream_max {
            Some(stream_max) => stream_max.min(self.transport_max),
            None => self.transport_max,
        }
    }
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            stream_max: None,
            transport_max: 1024 * 1024,
        }
    }
}

/// Bus operations used by the runtime.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish raw bytes to a subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Current payload caps for outgoing messages.
    async fn payload_limits(&self) -> Result<PayloadLimits>;

    /// Send a request and wait up to `timeout` for the reply payload.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;

    /// Durable subscription shared by every member of `queue_group`.
    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<DeliveryStream>;
}

/// Durable consumer / queue group name for `subject` on `node_id`.
///
/// Dots become dashes, as do spaces in the node id, e.g.
/// `("pipeline.nodeA", "node B")` → `"pipeline-nodeA-node-B"`.
pub fn consumer_name(subject: &str, node_id: &str) -> String {
    format!(
        "{}-{}",
        subject.replace('.', "-"),
        node_id.replace(['.', ' '], "-")
    )
}

// =============================================================================
// InMemoryBus
// =============================================================================

/// Reply function for in-memory requests.
pub type Responder = Arc<dyn Fn(Bytes) -> Result<Bytes> + Send + Sync>;

/// A message recorded by [`InMemoryBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_acked: u64,
    pub requests_executed: u64,
    pub active_subscribers: usize,
}

#[derive(Debug, Default)]
struct QueueGroup {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next: usize,
}

impl QueueGroup {
    /// Hand `delivery` to the next live member, round-robin.
    fn dispatch(&mut self, mut delivery: Delivery) -> bool {
        while !self.members.is_empty() {
            let idx = self.next % self.members.len();
            match self.members[idx].send(delivery) {
                Ok(()) => {
                    self.next = idx + 1;
                    return true;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.members.remove(idx);
                    delivery = returned;
                }
            }
        }
        false
    }
}

struct MemoryAcker {
    acked: Arc<AtomicU64>,
    done: AtomicBool,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(Error::bus("message already acknowledged"));
        }
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory bus with queue-group delivery and publish recording.
///
/// Each subject fans out to every queue group subscribed to it; inside a
/// group each message goes to exactly one member.
#[derive(Clone)]
pub struct InMemoryBus {
    /// subject -> queue group -> members
    groups: Arc<RwLock<HashMap<String, HashMap<String, QueueGroup>>>>,

    /// subject -> reply function
    responders: Arc<RwLock<HashMap<String, Responder>>>,

    published: Arc<RwLock<Vec<PublishedMessage>>>,

    requests: Arc<RwLock<Vec<PublishedMessage>>>,

    limits: PayloadLimits,

    acked: Arc<AtomicU64>,

    stats: Arc<RwLock<BusStats>>,
}

impl fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("limits", &self.limits)
            .field("acked", &self.acked.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Create a new InMemoryBus with a 1 MiB transport limit and no stream limit.
    pub fn new() -> Self {
        Self::with_limits(PayloadLimits::default())
    }

    pub fn with_limits(limits: PayloadLimits) -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            responders: Arc::new(RwLock::new(HashMap::new())),
            published: Arc::new(RwLock::new(Vec::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            limits,
            acked: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(RwLock::new(BusStats::default())),
        }
    }

    /// Deliver raw bytes to the subscribers of `subject` without recording a publish.
    ///
    /// Returns the number of queue groups that received the message.
    pub async fn inject(&self, subject: &str, payload: Bytes) -> usize {
        let mut groups = self.groups.write().await;
        let mut delivered = 0;
        if let Some(by_group) = groups.get_mut(subject) {
            for group in by_group.values_mut() {
                let acker = MemoryAcker {
                    acked: self.acked.clone(),
                    done: AtomicBool::new(false),
                };
                if group.dispatch(Delivery::new(subject, payload.clone(), Box::new(acker))) {
                    delivered += 1;
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.messages_delivered += delivered as u64;
        stats.active_subscribers = groups
            .values()
            .flat_map(|g| g.values())
            .map(|g| g.members.len())
            .sum();

        delivered
    }

    /// Register the reply function for requests on `subject`.
    pub async fn respond_with<F>(&self, subject: &str, responder: F)
    where
        F: Fn(Bytes) -> Result<Bytes> + Send + Sync + 'static,
    {
        self.responders
            .write()
            .await
            .insert(subject.to_string(), Arc::new(responder));
    }

    /// Every message published so far, in order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    /// Published messages on one subject.
    pub async fn published_on(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Every request sent so far, in order.
    pub async fn requests(&self) -> Vec<PublishedMessage> {
        self.requests.read().await.clone()
    }

    /// Number of acknowledged deliveries.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub async fn get_stats(&self) -> BusStats {
        let mut stats = self.stats.read().await.clone();
        stats.messages_acked = self.acked();
        stats
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        if payload.len() > self.limits.transport_max {
            return Err(Error::bus(format!(
                "maximum payload exceeded: {} > {}",
                payload.len(),
                self.limits.transport_max
            )));
        }

        self.published.write().await.push(PublishedMessage {
            subject: subject.to_string(),
            payload: payload.clone(),
        });
        self.stats.write().await.messages_published += 1;

        let delivered = self.inject(subject, payload).await;
        tracing::debug!("Published to subject={} groups={}", subject, delivered);

        Ok(())
    }

    async fn payload_limits(&self) -> Result<PayloadLimits> {
        Ok(self.limits)
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.requests.write().await.push(PublishedMessage {
            subject: subject.to_string(),
            payload: payload.clone(),
        });
        self.stats.write().await.requests_executed += 1;

        let responder = self
            .responders
            .read()
            .await
            .get(subject)
            .cloned()
            .ok_or_else(|| Error::bus(format!("no responders for subject {subject}")))?;

        tokio::time::timeout(timeout, async move { responder(payload) })
            .await
            .map_err(|_| Error::bus(format!("request to {subject} timed out")))?
    }

    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut groups = self.groups.write().await;
        groups
            .entry(subject.to_string())
            .or_default()
            .entry(queue_group.to_string())
            .or_default()
            .members
            .push(tx);

        let mut stats = self.stats.write().await;
        stats.active_subscribers = groups
            .values()
            .flat_map(|g| g.values())
            .map(|g| g.members.len())
            .sum();

        tracing::debug!(
            "Subscriber registered subject={} queue_group={}",
            subject,
            queue_group
        );

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_consumer_name() {
        assert_eq!(
            consumer_name("pipeline.nodeA", "node B"),
            "pipeline-nodeA-node-B"
        );
        assert_eq!(consumer_name("in", "exit.point"), "in-exit-point");
    }

    #[test]
    fn test_effective_limit() {
        let limits = PayloadLimits {
            stream_max: Some(512),
            transport_max: 1024,
        };
        assert_eq!(limits.effective(), 512);

        let limits = PayloadLimits {
            stream_max: Some(4096),
            transport_max: 1024,
        };
        assert_eq!(limits.effective(), 1024);

        let limits = PayloadLimits {
            stream_max: None,
            transport_max: 1024,
        };
        assert_eq!(limits.effective(), 1024);
    }

    #[tokio::test]
    async fn test_publish_to_zero_subscribers() {
        let bus = InMemoryBus::new();

        bus.publish("out", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(bus.published().await.len(), 1);
        let stats = bus.get_stats().await;
        assert_eq!(stats.messages_published, 1);
        assert_eq!(stats.messages_delivered, 0);
    }

    #[tokio::test]
    async fn test_queue_group_delivers_once() {
        let bus = InMemoryBus::new();
        let mut replica1 = bus.subscribe("in", "in-node").await.unwrap();
        let mut replica2 = bus.subscribe("in", "in-node").await.unwrap();
        let mut other = bus.subscribe("in", "in-audit").await.unwrap();

        bus.inject("in", Bytes::from_static(b"one")).await;
        bus.inject("in", Bytes::from_static(b"two")).await;

        // round-robin inside the group
        assert_eq!(replica1.next().await.unwrap().payload, "one");
        assert_eq!(replica2.next().await.unwrap().payload, "two");

        // every group gets its own copy
        assert_eq!(other.next().await.unwrap().payload, "one");
        assert_eq!(other.next().await.unwrap().payload, "two");

        assert_eq!(bus.get_stats().await.messages_delivered, 4);
    }

    #[tokio::test]
    async fn test_dropped_member_is_skipped() {
        let bus = InMemoryBus::new();
        let replica1 = bus.subscribe("in", "g").await.unwrap();
        let mut replica2 = bus.subscribe("in", "g").await.unwrap();
        drop(replica1);

        assert_eq!(bus.inject("in", Bytes::from_static(b"a")).await, 1);
        assert_eq!(replica2.next().await.unwrap().payload, "a");
    }

    #[tokio::test]
    async fn test_ack_counts_once() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("in", "g").await.unwrap();
        bus.inject("in", Bytes::from_static(b"a")).await;

        let delivery = sub.next().await.unwrap();
        delivery.ack().await.unwrap();
        assert!(delivery.ack().await.is_err());
        assert_eq!(bus.acked(), 1);
    }

    #[tokio::test]
    async fn test_publish_over_transport_limit() {
        let bus = InMemoryBus::with_limits(PayloadLimits {
            stream_max: None,
            transport_max: 4,
        });

        let err = bus
            .publish("out", Bytes::from_static(b"too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_response() {
        let bus = InMemoryBus::new();
        bus.respond_with("writer", |payload| {
            Ok(Bytes::from(format!("ack:{}", payload.len())))
        })
        .await;

        let reply = bus
            .request("writer", Bytes::from_static(b"abc"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "ack:3");
        assert_eq!(bus.requests().await.len(), 1);

        let err = bus
            .request("nobody", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }
}
