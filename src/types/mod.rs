//! Core types for the node runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed request identifiers
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: The process configuration, built once and passed explicitly
//! - **Scope**: The three configuration namespaces

mod config;
mod errors;
mod ids;
mod scope;

pub use config::{BusConfig, Config, DocumentsConfig, MetricsConfig, StorageConfig};
pub use errors::{Error, Result};
pub use ids::RequestId;
pub use scope::Scope;
