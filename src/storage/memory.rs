//! In-memory bucket backing both storage seams.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{KeyValueBucket, ObjectBucket};
use crate::types::Result;

/// Thread-safe in-memory bucket; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    entries: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl KeyValueBucket for MemoryBucket {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl ObjectBucket for MemoryBucket {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        KeyValueBucket::put(self, key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        KeyValueBucket::get(self, key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        KeyValueBucket::delete(self, key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
