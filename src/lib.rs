//! # Nodeflow - pipeline node runtime
//!
//! Runtime core embedded in every node process of a nodeflow pipeline:
//! - Durable, queue-grouped message intake with manual acknowledgment
//! - Origin-based handler dispatch with a default fallback
//! - Envelope encoding with transparent size-based gzip compression
//! - Scoped (node/workflow/project) configuration and optional blob storage
//! - Elapsed-time and outcome metrics per message
//!
//! ## Architecture
//!
//! A pipeline is a graph of independently deployed nodes exchanging
//! envelopes over the bus:
//! ```text
//!   entry ──► nodeA ──► nodeB ──► nodeC ──► exit
//!               │         │         │        ▲
//!               └─────────┴─────────┴────────┘
//!                 EARLY_REPLY / EARLY_EXIT / ERROR
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod commbus;
pub mod envelope;
pub mod exitpoint;
pub mod metrics;
pub mod runtime;
pub mod storage;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
