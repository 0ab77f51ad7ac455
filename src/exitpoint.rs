//! Exit adapter handlers.
//!
//! The exit adapter bridges the pipeline back to the external caller. It
//! receives every message type and forwards to its output subject only what
//! still has to reach the caller:
//! - from the last node: everything
//! - from any other node: `EARLY_REPLY`, `EARLY_EXIT` and `ERROR`
//!
//! A request is answered once. `EARLY_REPLY` and `EARLY_EXIT` envelopes are
//! themselves that answer, since a node publishes them only while the request
//! is unanswered. `OK` and `ERROR` envelopes of an answered request are
//! dropped.

use std::sync::Arc;

use crate::envelope::Payload;
use crate::runtime::{handler_fn, Handler, HandlerContext, HandlerManager};
use crate::types::{Error, Result};

/// Handler for the pipeline's last node.
pub fn last_node_handler() -> Arc<dyn Handler> {
    handler_fn(|ctx: HandlerContext, _payload: Payload| async move {
        if answered(&ctx) {
            return Ok(());
        }
        ctx.forward().await
    })
}

/// Handler for every other node.
pub fn default_handler() -> Arc<dyn Handler> {
    handler_fn(|ctx: HandlerContext, _payload: Payload| async move {
        if ctx.is_ok() {
            tracing::debug!(
                request_id = %ctx.request_id(),
                from_node = %ctx.from_node(),
                "Ignoring intermediate output"
            );
            return Ok(());
        }
        if answered(&ctx) {
            return Ok(());
        }
        ctx.forward().await
    })
}

/// True (and logged) for an `OK` or `ERROR` envelope of an answered request.
fn answered(ctx: &HandlerContext) -> bool {
    if !ctx.replied() || !(ctx.is_ok() || ctx.is_error()) {
        return false;
    }
    tracing::warn!(
        request_id = %ctx.request_id(),
        from_node = %ctx.from_node(),
        message_type = %ctx.envelope().message_type,
        "Dropping answer: {}",
        Error::AlreadyReplied(ctx.request_id().to_string())
    );
    true
}

/// Bindings for an exit adapter behind `last_node`.
pub fn handlers(last_node: &str) -> Result<HandlerManager> {
    let mut handlers = HandlerManager::new();
    handlers.register(last_node, last_node_handler())?;
    handlers.register_default(default_handler())?;
    Ok(handlers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_bind_last_node_and_default() {
        let manager = handlers("nodeC").unwrap();
        assert_eq!(manager.node_ids().collect::<Vec<_>>(), ["nodeC"]);
        assert!(manager.has_default());
        assert!(handlers("").is_err());
    }
}
