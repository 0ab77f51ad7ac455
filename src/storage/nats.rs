//! NATS JetStream KV and object store buckets.

use async_nats::jetstream::{self, kv, object_store};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use super::{KeyValueBucket, ObjectBucket};
use crate::types::{Error, Result};

/// JetStream key/value bucket.
#[derive(Debug, Clone)]
pub struct NatsKeyValue {
    bucket: String,
    store: kv::Store,
}

impl NatsKeyValue {
    /// Open an existing bucket; a missing bucket is a bootstrap failure.
    pub async fn open(jetstream: &jetstream::Context, bucket: &str) -> Result<Self> {
        let store = jetstream
            .get_key_value(bucket)
            .await
            .map_err(|e| Error::storage(format!("kv bucket {bucket}: {e}")))?;
        Ok(Self {
            bucket: bucket.to_string(),
            store,
        })
    }
}

#[async_trait]
impl KeyValueBucket for NatsKeyValue {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| Error::storage(format!("kv get {}/{key}: {e}", self.bucket)))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(key, value)
            .await
            .map_err(|e| Error::storage(format!("kv put {}/{key}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| Error::storage(format!("kv delete {}/{key}: {e}", self.bucket)))
    }
}

/// JetStream object store bucket.
#[derive(Clone)]
pub struct NatsObjectBucket {
    bucket: String,
    store: object_store::ObjectStore,
}

impl std::fmt::Debug for NatsObjectBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsObjectBucket")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl NatsObjectBucket {
    /// Open an existing bucket; a missing bucket is a bootstrap failure.
    pub async fn open(jetstream: &jetstream::Context, bucket: &str) -> Result<Self> {
        let store = jetstream
            .get_object_store(bucket)
            .await
            .map_err(|e| Error::storage(format!("object store {bucket}: {e}")))?;
        Ok(Self {
            bucket: bucket.to_string(),
            store,
        })
    }
}

#[async_trait]
impl ObjectBucket for NatsObjectBucket {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(key, &mut value.as_ref())
            .await
            .map_err(|e| Error::storage(format!("object put {}/{key}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut object = match self.store.get(key).await {
            Ok(object) => object,
            Err(e) if e.kind() == object_store::GetErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!(
                    "object get {}/{key}: {e}",
                    self.bucket
                )))
            }
        };

        let mut buffer = Vec::new();
        object.read_to_end(&mut buffer).await?;
        Ok(Some(Bytes::from(buffer)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| Error::storage(format!("object delete {}/{key}: {e}", self.bucket)))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut list = self
            .store
            .list()
            .await
            .map_err(|e| Error::storage(format!("object list {}: {e}", self.bucket)))?;

        let mut keys = Vec::new();
        while let Some(info) = list.next().await {
            let info =
                info.map_err(|e| Error::storage(format!("object list {}: {e}", self.bucket)))?;
            keys.push(info.name);
        }
        Ok(keys)
    }
}
