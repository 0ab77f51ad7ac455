//! Handler registry keyed by origin node.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::HandlerContext;
use crate::envelope::Payload;
use crate::types::{Error, Result};

/// User code invoked for one incoming envelope.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext, payload: Payload) -> Result<()>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F>(F);

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, payload: Payload) -> Result<()> {
        (self.0)(ctx, payload).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(HandlerContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Ordered `(origin node → handler)` bindings plus one default slot.
///
/// Resolution is an exact string match on the origin node, then the
/// default, then nothing.
#[derive(Default, Clone)]
pub struct HandlerManager {
    bindings: Vec<(String, Arc<dyn Handler>)>,
    default: Option<Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerManager")
            .field("bindings", &self.node_ids().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl HandlerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to envelopes from `node_id`.
    pub fn register(&mut self, node_id: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(Error::validation("handler node id cannot be empty"));
        }
        if self.bindings.iter().any(|(id, _)| *id == node_id) {
            return Err(Error::validation(format!(
                "handler already registered for node {node_id:?}"
            )));
        }
        tracing::debug!("Registered handler for node={}", node_id);
        self.bindings.push((node_id, handler));
        Ok(())
    }

    /// Bind the fallback for origins without their own binding.
    pub fn register_default(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        if self.default.is_some() {
            return Err(Error::validation("default handler already registered"));
        }
        self.default = Some(handler);
        Ok(())
    }

    pub fn dispatch(&self, origin_node: &str) -> Option<Arc<dyn Handler>> {
        self.bindings
            .iter()
            .find(|(id, _)| id == origin_node)
            .map(|(_, handler)| handler.clone())
            .or_else(|| self.default.clone())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(id, _)| id.as_str())
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.default.is_none()
    }
}
