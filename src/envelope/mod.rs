//! Envelope - the unit exchanged between nodes on the bus.
//!
//! An envelope carries a correlation id, the producing node, an opaque typed
//! payload and the request's message type. Two fields are append-only as the
//! request travels through the pipeline:
//! - **replied** only ever goes from `false` to `true`
//! - **tracking_chain** only grows, one record per traversed node

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RequestId;

pub mod codec;
pub mod enums;

pub use codec::EnvelopeCodec;
pub use enums::*;

/// Opaque typed payload: a schema tag plus raw bytes.
///
/// The runtime never inspects the bytes; handlers decode them using the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub type_tag: String,
    pub bytes: Bytes,
}

impl Payload {
    pub const TEXT: &'static str = "text/plain";

    pub fn new(type_tag: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            type_tag: type_tag.into(),
            bytes: bytes.into(),
        }
    }

    /// UTF-8 text payload tagged `text/plain`.
    pub fn text(s: impl Into<String>) -> Self {
        let s: String = s.into();
        Self::new(Self::TEXT, s)
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Timing record appended by each node a request traverses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub node_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inter-node message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id; minted when absent on the wire.
    #[serde(default)]
    pub request_id: RequestId,

    #[serde(default)]
    pub from_node: String,

    #[serde(default)]
    pub payload: Payload,

    /// Failure text, set only on `ERROR` envelopes.
    #[serde(default)]
    pub error: String,

    #[serde(default)]
    pub message_type: MessageType,

    #[serde(default)]
    replied: bool,

    #[serde(default)]
    pub tracking_chain: Vec<TrackingRecord>,
}

impl Envelope {
    /// New `OK` envelope with a fresh request id.
    pub fn new(from_node: impl Into<String>, payload: Payload) -> Self {
        Self {
            request_id: RequestId::new(),
            from_node: from_node.into(),
            payload,
            error: String::new(),
            message_type: MessageType::Ok,
            replied: false,
            tracking_chain: Vec::new(),
        }
    }

    /// `ERROR` envelope carrying the failure text.
    pub fn error(request_id: RequestId, from_node: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id,
            error: error.into(),
            message_type: MessageType::Error,
            ..Self::new(from_node, Payload::default())
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_tracking_chain(mut self, chain: Vec<TrackingRecord>) -> Self {
        self.tracking_chain = chain;
        self
    }

    /// True once the original caller has been answered.
    pub fn replied(&self) -> bool {
        self.replied
    }

    /// Set the replied flag. There is no way to clear it.
    pub fn mark_replied(&mut self) {
        self.replied = true;
    }

    pub fn push_tracking(&mut self, record: TrackingRecord) {
        self.tracking_chain.push(record);
    }

    pub fn is_ok(&self) -> bool {
        self.message_type == MessageType::Ok
    }

    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    pub fn is_early_reply(&self) -> bool {
        self.message_type == MessageType::EarlyReply
    }

    pub fn is_early_exit(&self) -> bool {
        self.message_type == MessageType::EarlyExit
    }
}
