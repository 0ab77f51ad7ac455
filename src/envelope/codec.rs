//! Envelope codec with transparent size-based compression.
//!
//! Wire format:
//! ```text
//! plain:      ┌──────────────────────────────┐
//!             │ msgpack envelope (named map) │
//!             └──────────────────────────────┘
//! compressed: ┌──────┬──────┬─────────────────────────────────┐
//!             │ 0x1f │ 0x8b │ gzip(msgpack envelope) cont.    │
//!             └──────┴──────┴─────────────────────────────────┘
//! ```
//! A msgpack map never starts with `0x1f`, so the gzip magic is enough for
//! `decode` to tell the two forms apart without a caller-supplied hint.

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::io::{Read, Write};

use super::Envelope;
use crate::types::{Error, RequestId, Result};

/// Two-byte gzip magic marking a compressed frame.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default transport threshold (1 MiB).
pub const DEFAULT_THRESHOLD: usize = 1024 * 1024;

/// Upper bound on an inflated envelope (64 MiB).
pub const MAX_INFLATED_SIZE: usize = 64 * 1024 * 1024;

const COMPRESSION_LEVEL: u32 = 9;

/// True when `bytes` starts with the gzip magic.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= GZIP_MAGIC.len() && bytes[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// Gzip `bytes` at best compression.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(bytes.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip stream, failing once the output would exceed `limit`.
pub fn decompress(bytes: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(2).min(limit));
    GzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::decode(format!("invalid gzip stream: {e}")))?;
    if out.len() > limit {
        return Err(Error::decode(format!(
            "inflated envelope exceeds {limit} bytes"
        )));
    }
    Ok(out)
}

/// Keep `raw` as-is when it fits `max`, otherwise compress it.
///
/// Fails with `MessageTooBig` when even the compressed form exceeds `max`;
/// nothing truncated is ever returned.
pub fn fit_to_limit(raw: Vec<u8>, max: usize) -> Result<Vec<u8>> {
    if raw.len() <= max {
        return Ok(raw);
    }

    let original = raw.len();
    let compressed = compress(&raw)?;
    if compressed.len() > max {
        tracing::warn!(
            original_mb = mb(original),
            compressed_mb = mb(compressed.len()),
            max_mb = mb(max),
            "Compressed message exceeds maximum size"
        );
        return Err(Error::MessageTooBig {
            size: compressed.len(),
            max,
        });
    }

    tracing::info!(
        original_mb = mb(original),
        compressed_mb = mb(compressed.len()),
        "Message compressed"
    );
    Ok(compressed)
}

fn mb(size: usize) -> f64 {
    size as f64 / (1024.0 * 1024.0)
}

/// Envelope encoder/decoder bound to a compression threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    threshold: usize,
    max_inflated: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl EnvelopeCodec {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            max_inflated: MAX_INFLATED_SIZE,
        }
    }

    /// Cap on the decompressed size accepted by `decode`.
    pub fn with_max_inflated(mut self, max_inflated: usize) -> Self {
        self.max_inflated = max_inflated;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Serialize without compression.
    pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(envelope)
            .map_err(|e| Error::validation(format!("envelope serialization failed: {e}")))
    }

    /// Serialize, compressing only above the threshold.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let raw = Self::serialize(envelope)?;
        Ok(Bytes::from(fit_to_limit(raw, self.threshold)?))
    }

    /// Decompress if the gzip magic is present, then deserialize.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        if is_compressed(bytes) {
            let inflated = decompress(bytes, self.max_inflated)?;
            tracing::debug!(
                compressed = bytes.len(),
                inflated = inflated.len(),
                "Message decompressed"
            );
            return Self::deserialize(&inflated);
        }
        Self::deserialize(bytes)
    }

    fn deserialize(bytes: &[u8]) -> Result<Envelope> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| Error::decode(format!("not a valid envelope: {e}")))
    }

    /// Best-effort request id from bytes that failed to decode as a whole.
    pub fn recover_request_id(&self, bytes: &[u8]) -> Option<RequestId> {
        #[derive(Deserialize)]
        struct Partial {
            request_id: Option<String>,
        }

        let inflated;
        let bytes = if is_compressed(bytes) {
            inflated = decompress(bytes, self.max_inflated).ok()?;
            inflated.as_slice()
        } else {
            bytes
        };

        let partial: Partial = rmp_serde::from_slice(bytes).ok()?;
        partial
            .request_id
            .and_then(|id| RequestId::from_string(id).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageType, Payload, TrackingRecord};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn envelope_with(bytes: Vec<u8>) -> Envelope {
        Envelope::new("nodeA", Payload::new("application/octet-stream", bytes))
    }

    #[test]
    fn test_is_compressed_short_input() {
        assert!(!is_compressed(&[]));
        assert!(!is_compressed(&[0x1f]));
        assert!(is_compressed(&[0x1f, 0x8b]));
    }

    #[test]
    fn test_small_envelope_not_compressed() {
        let codec = EnvelopeCodec::default();
        let env = Envelope::new("nodeA", Payload::text("Alex"));
        let bytes = codec.encode(&env).unwrap();

        assert!(!is_compressed(&bytes));
        assert_eq!(codec.decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_compresses_iff_above_threshold() {
        let env = envelope_with(vec![b'a'; 4096]);
        let raw_len = EnvelopeCodec::serialize(&env).unwrap().len();

        let at_threshold = EnvelopeCodec::new(raw_len).encode(&env).unwrap();
        assert!(!is_compressed(&at_threshold));

        let below = EnvelopeCodec::new(raw_len - 1).encode(&env).unwrap();
        assert!(is_compressed(&below));
        assert!(below.len() < raw_len);
        assert_eq!(EnvelopeCodec::default().decode(&below).unwrap(), env);
    }

    #[test]
    fn test_incompressible_payload_is_too_big() {
        // xorshift noise does not compress
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let noise: Vec<u8> = (0..8192)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let codec = EnvelopeCodec::new(1024);

        let err = codec.encode(&envelope_with(noise)).unwrap_err();
        assert!(matches!(err, Error::MessageTooBig { max: 1024, .. }));
    }

    #[test]
    fn test_decode_garbage() {
        let codec = EnvelopeCodec::default();
        assert!(matches!(codec.decode(b"\xc1\xc1\xc1"), Err(Error::Decode(_))));
        // magic present but truncated stream
        assert!(matches!(
            codec.decode(&[0x1f, 0x8b, 0x08, 0x00]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_inflated_size_is_capped() {
        let env = envelope_with(vec![0u8; 256 * 1024]);
        let bytes = EnvelopeCodec::new(1024).encode(&env).unwrap();
        assert!(is_compressed(&bytes));
        assert!(bytes.len() < 4096);

        let capped = EnvelopeCodec::default().with_max_inflated(64 * 1024);
        let err = capped.decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::Decode(msg) if msg.contains("exceeds")));

        assert_eq!(EnvelopeCodec::default().decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_recover_request_id() {
        let codec = EnvelopeCodec::default();
        let env = Envelope::new("nodeA", Payload::text("x"));
        let bytes = codec.encode(&env).unwrap();
        assert_eq!(codec.recover_request_id(&bytes), Some(env.request_id.clone()));

        let compressed = compress(&bytes).unwrap();
        assert_eq!(codec.recover_request_id(&compressed), Some(env.request_id));

        assert_eq!(codec.recover_request_id(b"nonsense"), None);
    }

    fn arb_message_type() -> impl Strategy<Value = MessageType> {
        prop_oneof![
            Just(MessageType::Ok),
            Just(MessageType::Error),
            Just(MessageType::EarlyReply),
            Just(MessageType::EarlyExit),
        ]
    }

    prop_compose! {
        fn arb_envelope()(
            from_node in "[a-zA-Z0-9_-]{1,16}",
            type_tag in "[a-z/]{0,24}",
            bytes in prop::collection::vec(any::<u8>(), 0..512),
            repeat in 1usize..64,
            error in ".{0,32}",
            message_type in arb_message_type(),
            replied in any::<bool>(),
            hops in prop::collection::vec(("[a-z]{1,8}", 0i64..4_000_000_000_000i64), 0..4),
        ) -> Envelope {
            let mut env = Envelope::new(from_node, Payload::new(type_tag, bytes.repeat(repeat)))
                .with_message_type(message_type);
            env.error = error;
            if replied {
                env.mark_replied();
            }
            for (name, millis) in hops {
                let at = Utc.timestamp_millis_opt(millis).unwrap();
                env.push_tracking(TrackingRecord { node_name: name, start: at, end: at });
            }
            env
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(env in arb_envelope(), threshold in prop_oneof![Just(64usize), Just(DEFAULT_THRESHOLD)]) {
            let codec = EnvelopeCodec::new(threshold);
            match codec.encode(&env) {
                Ok(bytes) => prop_assert_eq!(codec.decode(&bytes).unwrap(), env),
                Err(Error::MessageTooBig { max, .. }) => prop_assert_eq!(max, threshold),
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
