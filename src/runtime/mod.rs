//! Node runtime: handler dispatch, output publishing and the message loop.
//!
//! ```text
//!  bus ──► MessageRunner ──decode──► HandlerManager ──► Handler(HandlerContext)
//!             │  ack                                        │
//!             ▼                                             ▼
//!          metrics                                   OutputPublisher ──► bus
//! ```

mod context;
mod documents;
mod manager;
mod node;
mod publisher;
mod runner;

pub use context::{HandlerContext, NodeContext};
pub use documents::{
    Documents, PredictionDoc, PredictionError, QueryData, CLASSIFICATION_METRICS,
};
pub use manager::{handler_fn, FnHandler, Handler, HandlerManager};
pub use node::{Hook, Node, NodeBuilder, Services};
pub use publisher::OutputPublisher;
pub use runner::{MessageRunner, ProcessOutcome};
