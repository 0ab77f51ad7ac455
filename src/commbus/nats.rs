//! NATS JetStream implementation of the bus seam.

use async_nats::jetstream::{self, consumer::push, consumer::AckPolicy, consumer::DeliverPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::time::Duration;

use super::{Acknowledge, Delivery, DeliveryStream, MessageBus, PayloadLimits};
use crate::types::{Config, Error, Result};

/// JetStream-backed bus.
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    stream: String,
    ack_wait: Duration,
}

impl NatsBus {
    /// Connect to the configured server and check the stream exists.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = async_nats::connect(&config.bus.server)
            .await
            .map_err(|e| Error::bus(format!("connect to {}: {e}", config.bus.server)))?;
        let jetstream = jetstream::new(client.clone());

        jetstream
            .get_stream(&config.bus.stream)
            .await
            .map_err(|e| Error::bus(format!("stream {}: {e}", config.bus.stream)))?;

        tracing::info!(
            server = %config.bus.server,
            stream = %config.bus.stream,
            "Connected to NATS"
        );

        Ok(Self {
            client,
            jetstream,
            stream: config.bus.stream.clone(),
            ack_wait: config.bus.ack_wait,
        })
    }

    /// JetStream context, shared with the KV and object store adapters.
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::bus(format!("publish to {subject}: {e}")))?
            .await
            .map_err(|e| Error::bus(format!("publish ack from {subject}: {e}")))?;
        Ok(())
    }

    async fn payload_limits(&self) -> Result<PayloadLimits> {
        let stream = self
            .jetstream
            .get_stream(&self.stream)
            .await
            .map_err(|e| Error::bus(format!("stream {}: {e}", self.stream)))?;

        // -1 (or 0) means the stream imposes no limit
        let configured = stream.cached_info().config.max_message_size;
        let stream_max = usize::try_from(configured).ok().filter(|max| *max > 0);

        Ok(PayloadLimits {
            stream_max,
            transport_max: self.client.server_info().max_payload,
        })
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        let response = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
            .await
            .map_err(|_| Error::bus(format!("request to {subject} timed out")))?
            .map_err(|e| Error::bus(format!("request to {subject}: {e}")))?;
        Ok(response.payload)
    }

    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<DeliveryStream> {
        let stream = self
            .jetstream
            .get_stream(&self.stream)
            .await
            .map_err(|e| Error::bus(format!("stream {}: {e}", self.stream)))?;

        let consumer = stream
            .get_or_create_consumer(
                queue_group,
                push::Config {
                    deliver_subject: format!("_DELIVER.{queue_group}"),
                    durable_name: Some(queue_group.to_string()),
                    deliver_group: Some(queue_group.to_string()),
                    filter_subject: subject.to_string(),
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::bus(format!("consumer {queue_group}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::bus(format!("subscribe {subject}: {e}")))?;

        tracing::info!(
            subject = %subject,
            queue_group = %queue_group,
            "Subscribed"
        );

        let deliveries = messages.filter_map(|message| async move {
            match message {
                Ok(message) => {
                    let subject = message.subject.to_string();
                    let payload = message.payload.clone();
                    Some(Delivery::new(subject, payload, Box::new(NatsAcker(message))))
                }
                Err(e) => {
                    tracing::warn!("Dropping undeliverable message: {}", e);
                    None
                }
            }
        });
        Ok(Box::pin(deliveries))
    }
}

struct NatsAcker(jetstream::Message);

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack()
            .await
            .map_err(|e| Error::bus(format!("ack: {e}")))
    }
}
