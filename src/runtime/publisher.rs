//! Output publisher.
//!
//! Builds envelopes stamped with this node's id, sizes them against the
//! bus limits and publishes them to the resolved output subject.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::commbus::MessageBus;
use crate::envelope::{codec, Envelope, EnvelopeCodec, MessageType, Payload};
use crate::types::{Config, RequestId, Result};

#[derive(Clone)]
pub struct OutputPublisher {
    bus: Arc<dyn MessageBus>,
    node_id: String,
    output_subject: String,
}

impl fmt::Debug for OutputPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPublisher")
            .field("node_id", &self.node_id)
            .field("output_subject", &self.output_subject)
            .finish_non_exhaustive()
    }
}

impl OutputPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, config: &Config) -> Self {
        Self {
            bus,
            node_id: config.node_id.clone(),
            output_subject: config.bus.output_subject.clone(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Base output subject, suffixed with `.{channel}` when a channel is given.
    pub fn output_subject(&self, channel: &str) -> String {
        if channel.is_empty() {
            self.output_subject.clone()
        } else {
            format!("{}.{}", self.output_subject, channel)
        }
    }

    /// Envelope from this node, minting a request id when none is given.
    pub fn build_envelope(
        &self,
        payload: Payload,
        request_id: Option<RequestId>,
        message_type: MessageType,
    ) -> Envelope {
        Envelope::new(self.node_id.clone(), payload)
            .with_request_id(request_id.unwrap_or_default())
            .with_message_type(message_type)
    }

    pub async fn publish(
        &self,
        payload: Payload,
        request_id: Option<RequestId>,
        message_type: MessageType,
        channel: &str,
    ) -> Result<()> {
        let envelope = self.build_envelope(payload, request_id, message_type);
        self.publish_envelope(&envelope, channel).await
    }

    /// Encode and publish a fully built envelope.
    ///
    /// Publishes nothing when the envelope does not fit the effective limit
    /// even after compression.
    pub async fn publish_envelope(&self, envelope: &Envelope, channel: &str) -> Result<()> {
        let subject = self.output_subject(channel);
        let max = self.bus.payload_limits().await?.effective();

        let raw = EnvelopeCodec::serialize(envelope)?;
        let bytes = codec::fit_to_limit(raw, max).map_err(|e| {
            tracing::error!(
                request_id = %envelope.request_id,
                subject = %subject,
                "Not publishing envelope: {}",
                e
            );
            e
        })?;
        let size = bytes.len();

        if let Err(e) = self.bus.publish(&subject, Bytes::from(bytes)).await {
            tracing::error!(
                request_id = %envelope.request_id,
                subject = %subject,
                "Publish failed: {}",
                e
            );
            return Err(e);
        }

        tracing::info!(
            request_id = %envelope.request_id,
            subject = %subject,
            message_type = %envelope.message_type,
            size,
            "Published envelope"
        );
        Ok(())
    }

    /// Publish an `ERROR` envelope carrying `error_text`.
    pub async fn publish_error(&self, request_id: RequestId, error_text: &str) -> Result<()> {
        let envelope = Envelope::error(request_id, self.node_id.clone(), error_text);
        self.publish_envelope(&envelope, "").await
    }
}
