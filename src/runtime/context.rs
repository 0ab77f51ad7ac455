//! Per-process and per-message contexts handed to handler code.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Documents, OutputPublisher};
use crate::envelope::{Envelope, MessageType, Payload, TrackingRecord};
use crate::metrics::Measurement;
use crate::storage::{ObjectStore, ScopedConfig};
use crate::types::{Config, Error, RequestId, Result};

/// Services shared by every message of one node process.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub config: Arc<Config>,
    pub publisher: OutputPublisher,
    pub configuration: ScopedConfig,
    pub objects: ObjectStore,
    pub measurement: Measurement,
    pub documents: Documents,
}

/// Facade bound to one incoming envelope.
///
/// A fresh context is created per message; clones share the reply state.
#[derive(Clone)]
pub struct HandlerContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    node: Arc<NodeContext>,
    envelope: Envelope,
    received_at: DateTime<Utc>,
    replied: AtomicBool,
    halted: AtomicBool,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request_id", &self.inner.envelope.request_id)
            .field("from_node", &self.inner.envelope.from_node)
            .field("replied", &self.replied())
            .field("halted", &self.is_halted())
            .finish()
    }
}

impl HandlerContext {
    pub fn new(node: Arc<NodeContext>, envelope: Envelope, received_at: DateTime<Utc>) -> Self {
        let replied = AtomicBool::new(envelope.replied());
        Self {
            inner: Arc::new(ContextInner {
                node,
                envelope,
                received_at,
                replied,
                halted: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.inner.envelope.request_id
    }

    /// The incoming envelope this context is bound to.
    pub fn envelope(&self) -> &Envelope {
        &self.inner.envelope
    }

    pub fn from_node(&self) -> &str {
        &self.inner.envelope.from_node
    }

    pub fn is_ok(&self) -> bool {
        self.inner.envelope.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.inner.envelope.is_error()
    }

    pub fn is_early_reply(&self) -> bool {
        self.inner.envelope.is_early_reply()
    }

    pub fn is_early_exit(&self) -> bool {
        self.inner.envelope.is_early_exit()
    }

    /// True once the original caller has been answered for this request.
    pub fn replied(&self) -> bool {
        self.inner.replied.load(Ordering::SeqCst)
    }

    /// True after an early exit; further output is suppressed.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.inner.node.config
    }

    pub fn configuration(&self) -> &ScopedConfig {
        &self.inner.node.configuration
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.inner.node.objects
    }

    pub fn measurement(&self) -> &Measurement {
        &self.inner.node.measurement
    }

    pub fn documents(&self) -> &Documents {
        &self.inner.node.documents
    }

    /// `relative` joined onto the configured base path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.inner.node.config.base_path.join(relative)
    }

    /// Publish `payload` as `OK` on the base output subject or on `channel`.
    pub async fn send_output(&self, payload: Payload, channel: &str) -> Result<()> {
        self.send_output_with_request_id(payload, self.request_id().clone(), channel)
            .await
    }

    /// Publish `payload` as `OK` under a caller-chosen request id.
    pub async fn send_output_with_request_id(
        &self,
        payload: Payload,
        request_id: RequestId,
        channel: &str,
    ) -> Result<()> {
        if self.suppressed("output") {
            return Ok(());
        }
        let envelope = self.outgoing(payload, request_id, MessageType::Ok);
        self.inner.node.publisher.publish_envelope(&envelope, channel).await
    }

    /// Answer the original caller while the workflow keeps running.
    pub async fn send_early_reply(&self, payload: Payload) -> Result<()> {
        if self.suppressed("early reply") || !self.reserve_reply() {
            return Ok(());
        }
        let envelope = self.outgoing(payload, self.request_id().clone(), MessageType::EarlyReply);
        let result = self.inner.node.publisher.publish_envelope(&envelope, "").await;
        if result.is_err() {
            self.release_reply();
        }
        result
    }

    /// Answer the original caller and stop the request.
    pub async fn send_early_exit(&self, payload: Payload) -> Result<()> {
        let was_halted = self.inner.halted.swap(true, Ordering::SeqCst);
        if !self.reserve_reply() {
            return Ok(());
        }
        let envelope = self.outgoing(payload, self.request_id().clone(), MessageType::EarlyExit);
        let result = self.inner.node.publisher.publish_envelope(&envelope, "").await;
        if result.is_err() {
            self.release_reply();
            if !was_halted {
                self.inner.halted.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    /// Report a failure for this request as an `ERROR` envelope.
    ///
    /// Once the caller has been answered the report is dropped, so a request
    /// never produces a second visible answer.
    pub async fn send_error(&self, error_text: &str) -> Result<()> {
        if self.replied() {
            tracing::warn!(
                request_id = %self.request_id(),
                "Dropping error report: {}",
                Error::AlreadyReplied(self.request_id().to_string())
            );
            return Ok(());
        }
        let mut envelope = self.outgoing(Payload::default(), self.request_id().clone(), MessageType::Error);
        envelope.error = error_text.to_string();
        self.inner.node.publisher.publish_envelope(&envelope, "").await
    }

    /// Republish the bound envelope's payload, type and error text as this node.
    pub async fn forward(&self) -> Result<()> {
        if self.suppressed("forward") {
            return Ok(());
        }
        let bound = &self.inner.envelope;
        let mut envelope = self.outgoing(
            bound.payload.clone(),
            bound.request_id.clone(),
            bound.message_type,
        );
        envelope.error = bound.error.clone();
        self.inner.node.publisher.publish_envelope(&envelope, "").await
    }

    fn outgoing(&self, payload: Payload, request_id: RequestId, message_type: MessageType) -> Envelope {
        let publisher = &self.inner.node.publisher;
        let mut chain = self.inner.envelope.tracking_chain.clone();
        chain.push(TrackingRecord {
            node_name: publisher.node_id().to_string(),
            start: self.inner.received_at,
            end: Utc::now(),
        });

        let mut envelope = publisher
            .build_envelope(payload, Some(request_id), message_type)
            .with_tracking_chain(chain);
        if self.replied() {
            envelope.mark_replied();
        }
        envelope
    }

    /// Claim the single reply slot. False (and logged) when it is taken.
    ///
    /// The claim is released again when the reply fails to publish.
    fn reserve_reply(&self) -> bool {
        if self.inner.replied.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                request_id = %self.request_id(),
                "Ignoring reply: {}",
                Error::AlreadyReplied(self.request_id().to_string())
            );
            return false;
        }
        true
    }

    fn release_reply(&self) {
        self.inner.replied.store(false, Ordering::SeqCst);
    }

    fn suppressed(&self, action: &str) -> bool {
        if self.is_halted() {
            tracing::warn!(
                request_id = %self.request_id(),
                "Ignoring {} after early exit",
                action
            );
            return true;
        }
        false
    }
}
