//! Object store over one optional bucket.
//!
//! Without a configured bucket every operation fails with `UndefinedStore`,
//! so handlers can treat blob storage as optional infrastructure.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use super::ObjectBucket;
use crate::types::{Error, Result};

#[derive(Clone, Default)]
pub struct ObjectStore {
    bucket: Option<Arc<dyn ObjectBucket>>,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("defined", &self.bucket.is_some())
            .finish()
    }
}

impl ObjectStore {
    pub fn new(bucket: Arc<dyn ObjectBucket>) -> Self {
        Self {
            bucket: Some(bucket),
        }
    }

    /// Store with no bucket configured.
    pub fn undefined() -> Self {
        Self { bucket: None }
    }

    pub fn is_defined(&self) -> bool {
        self.bucket.is_some()
    }

    fn bucket(&self) -> Result<&dyn ObjectBucket> {
        self.bucket.as_deref().ok_or(Error::UndefinedStore)
    }

    /// Store `payload` under `key`.
    pub async fn save(&self, key: &str, payload: impl Into<Bytes>) -> Result<()> {
        let bucket = self.bucket()?;
        let payload = payload.into();
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if key.is_empty() {
            return Err(Error::validation("object key cannot be empty"));
        }

        bucket.put(key, payload).await?;
        tracing::debug!(key = %key, "Object saved");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.bucket()?
            .get(key)
            .await?
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.bucket()?.delete(key).await?;
        tracing::debug!(key = %key, "Object deleted");
        Ok(())
    }

    /// Keys matching the glob `pattern` (all keys when `None`), sorted.
    pub async fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let bucket = self.bucket()?;
        let matcher = pattern
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| Error::validation(format!("invalid pattern {p:?}: {e}")))
            })
            .transpose()?;

        let mut keys: Vec<String> = bucket
            .keys()
            .await?
            .into_iter()
            .filter(|key| matcher.as_ref().map_or(true, |m| m.matches(key)))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Delete every key matching `pattern`, one by one.
    ///
    /// Not transactional: a key written concurrently with the purge may survive.
    /// Returns the number of keys deleted.
    pub async fn purge(&self, pattern: Option<&str>) -> Result<usize> {
        let keys = self.list(pattern).await?;
        let bucket = self.bucket()?;

        for key in &keys {
            bucket.delete(key).await?;
        }

        tracing::info!(
            pattern = pattern.unwrap_or("*"),
            deleted = keys.len(),
            "Object store purged"
        );
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBucket;

    fn store() -> (ObjectStore, MemoryBucket) {
        let bucket = MemoryBucket::new();
        (ObjectStore::new(Arc::new(bucket.clone())), bucket)
    }

    #[tokio::test]
    async fn test_undefined_store() {
        let store = ObjectStore::undefined();
        assert!(matches!(store.save("k", "v").await, Err(Error::UndefinedStore)));
        assert!(matches!(store.get("k").await, Err(Error::UndefinedStore)));
        assert!(matches!(store.delete("k").await, Err(Error::UndefinedStore)));
        assert!(matches!(store.list(None).await, Err(Error::UndefinedStore)));
        assert!(matches!(store.purge(None).await, Err(Error::UndefinedStore)));
    }

    #[tokio::test]
    async fn test_empty_payload_leaves_no_entry() {
        let (store, bucket) = store();

        let err = store.save("k", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
        assert!(!bucket.contains("k").await);
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let (store, _) = store();
        store.save("model.bin", vec![1u8, 2, 3]).await.unwrap();
        assert_eq!(store.get("model.bin").await.unwrap(), vec![1u8, 2, 3]);

        store.delete("model.bin").await.unwrap();
        assert!(matches!(
            store.get("model.bin").await,
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_purge_by_pattern() {
        let (store, bucket) = store();
        for key in ["test1", "test2", "other"] {
            store.save(key, "data").await.unwrap();
        }

        assert_eq!(store.list(Some("test*")).await.unwrap(), ["test1", "test2"]);
        assert_eq!(store.list(None).await.unwrap().len(), 3);

        assert_eq!(store.purge(Some("test*")).await.unwrap(), 2);
        assert_eq!(store.list(None).await.unwrap(), ["other"]);
        assert_eq!(bucket.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let (store, _) = store();
        assert!(matches!(
            store.list(Some("[")).await,
            Err(Error::Validation(_))
        ));
    }
}
