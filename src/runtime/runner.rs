//! Message runner: decode → route → invoke → ack → observe.
//!
//! Every delivery is acknowledged exactly once whatever the outcome. Decode,
//! routing and handler failures become `ERROR` envelopes on the output
//! subject instead of redeliveries, unless the request was already answered.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::{Handler, HandlerContext, HandlerManager, NodeContext};
use crate::commbus::Delivery;
use crate::envelope::{EnvelopeCodec, Payload};
use crate::metrics::{Point, ELAPSED_TIME_MEASUREMENT};
use crate::types::{Error, RequestId, Result};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handler returned successfully.
    Handled,
    /// Handler (or a processor hook) failed; an `ERROR` envelope was emitted.
    HandlerFailed,
    /// No binding and no default; an `ERROR` envelope was emitted.
    MissingHandler,
    /// Bytes were not a valid envelope; an `ERROR` envelope was emitted.
    DecodeFailed,
    /// Terminal envelope not accepted by this node; acknowledged only.
    Skipped,
}

#[derive(Clone)]
pub struct MessageRunner {
    node: Arc<NodeContext>,
    handlers: Arc<HandlerManager>,
    codec: EnvelopeCodec,
    preprocessor: Option<Arc<dyn Handler>>,
    postprocessor: Option<Arc<dyn Handler>>,
    accept_terminal: bool,
}

impl fmt::Debug for MessageRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRunner")
            .field("node_id", &self.node.config.node_id)
            .field("handlers", &self.handlers)
            .field("accept_terminal", &self.accept_terminal)
            .finish_non_exhaustive()
    }
}

impl MessageRunner {
    pub fn new(node: Arc<NodeContext>, handlers: Arc<HandlerManager>) -> Self {
        Self {
            node,
            handlers,
            codec: EnvelopeCodec::default(),
            preprocessor: None,
            postprocessor: None,
            accept_terminal: false,
        }
    }

    /// Hook run before the routed handler.
    pub fn with_preprocessor(mut self, handler: Arc<dyn Handler>) -> Self {
        self.preprocessor = Some(handler);
        self
    }

    /// Hook run after the routed handler succeeded.
    pub fn with_postprocessor(mut self, handler: Arc<dyn Handler>) -> Self {
        self.postprocessor = Some(handler);
        self
    }

    /// Also hand `ERROR` and `EARLY_EXIT` envelopes to handlers (exit adapters).
    pub fn accept_terminal(mut self, accept: bool) -> Self {
        self.accept_terminal = accept;
        self
    }

    pub fn node(&self) -> &Arc<NodeContext> {
        &self.node
    }

    /// Process one raw bus message.
    pub async fn process(&self, delivery: Delivery) -> ProcessOutcome {
        let started = Instant::now();
        let received_at = Utc::now();
        let node_id = &self.node.config.node_id;

        let envelope = match self.codec.decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.ack(&delivery).await;
                let request_id = self
                    .codec
                    .recover_request_id(&delivery.payload)
                    .unwrap_or_default();
                tracing::error!(
                    subject = %delivery.subject,
                    request_id = %request_id,
                    "Invalid message: {}",
                    e
                );
                let text = format!(
                    "Error in node {node_id:?} decoding message from subject {:?}: {e}",
                    delivery.subject
                );
                self.emit_error(request_id, &text).await;
                self.observe("", started, Some(&e)).await;
                return ProcessOutcome::DecodeFailed;
            }
        };

        let from_node = envelope.from_node.clone();
        tracing::info!(
            request_id = %envelope.request_id,
            from_node = %from_node,
            message_type = %envelope.message_type,
            subject = %delivery.subject,
            "Received message"
        );

        if envelope.message_type.is_terminal() && !self.accept_terminal {
            self.ack(&delivery).await;
            tracing::debug!(
                request_id = %envelope.request_id,
                "Skipping terminal {} envelope",
                envelope.message_type
            );
            return ProcessOutcome::Skipped;
        }

        let request_id = envelope.request_id.clone();
        let payload = envelope.payload.clone();
        let ctx = HandlerContext::new(self.node.clone(), envelope, received_at);

        let Some(handler) = self.handlers.dispatch(&from_node) else {
            self.ack(&delivery).await;
            let err = Error::MissingHandler(from_node.clone());
            tracing::error!(request_id = %request_id, "{}", err);
            let text = format!("Error missing handler for node {from_node:?}");
            self.report(&ctx, &text).await;
            self.observe(&from_node, started, Some(&err)).await;
            return ProcessOutcome::MissingHandler;
        };

        let result = self.invoke(handler, ctx.clone(), payload).await;
        self.ack(&delivery).await;

        match result {
            Ok(()) => {
                tracing::info!(
                    request_id = %request_id,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Handler completed"
                );
                self.observe(&from_node, started, None).await;
                ProcessOutcome::Handled
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, code = e.code(), "Handler failed: {}", e);
                let text = format!(
                    "Error in node {node_id:?} executing handler for node {from_node:?}: {e}"
                );
                self.report(&ctx, &text).await;
                let err = Error::handler(e.to_string());
                self.observe(&from_node, started, Some(&err)).await;
                ProcessOutcome::HandlerFailed
            }
        }
    }

    async fn invoke(
        &self,
        handler: Arc<dyn Handler>,
        ctx: HandlerContext,
        payload: Payload,
    ) -> Result<()> {
        if let Some(pre) = &self.preprocessor {
            pre.handle(ctx.clone(), payload.clone()).await?;
        }
        handler.handle(ctx.clone(), payload.clone()).await?;
        if let Some(post) = &self.postprocessor {
            post.handle(ctx, payload).await?;
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            tracing::warn!(subject = %delivery.subject, "Ack failed: {}", e);
        }
    }

    // publish failures are already logged by the publisher
    async fn emit_error(&self, request_id: RequestId, text: &str) {
        let _ = self.node.publisher.publish_error(request_id, text).await;
    }

    async fn report(&self, ctx: &HandlerContext, text: &str) {
        let _ = ctx.send_error(text).await;
    }

    async fn observe(&self, from_node: &str, started: Instant, error: Option<&Error>) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut point = Point::new(ELAPSED_TIME_MEASUREMENT)
            .tag("from_node", from_node)
            .tag("success", error.is_none().to_string())
            .field("elapsed_ms", elapsed_ms);
        if let Some(e) = error {
            point = point.tag("code", e.code());
        }
        self.node.measurement.record(point).await;
    }
}
