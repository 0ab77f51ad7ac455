//! Long-lived storage reachable from handlers.
//!
//! - **Scoped configuration**: three independent KV namespaces (node, workflow,
//!   project) with most-specific-first fallback lookup
//! - **Object store**: optional key/blob bucket with glob listing and purge
//!
//! Backends plug in through [`KeyValueBucket`] and [`ObjectBucket`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::Result;

pub mod config_store;
pub mod memory;
pub mod nats;
pub mod object_store;

pub use config_store::ScopedConfig;
pub use memory::MemoryBucket;
pub use object_store::ObjectStore;

/// One key/value namespace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// One blob bucket.
#[async_trait]
pub trait ObjectBucket: Send + Sync {
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;
    /// `Ok(None)` when the object is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Every key currently in the bucket.
    async fn keys(&self) -> Result<Vec<String>>;
}
