//! Scoped configuration store.
//!
//! Three independent KV namespaces keyed by [`Scope`]. An unscoped `get`
//! searches node, then workflow, then project and returns the first hit.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use super::KeyValueBucket;
use crate::types::{Error, Result, Scope};

#[derive(Clone)]
pub struct ScopedConfig {
    node: Arc<dyn KeyValueBucket>,
    workflow: Arc<dyn KeyValueBucket>,
    project: Arc<dyn KeyValueBucket>,
}

impl fmt::Debug for ScopedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConfig").finish_non_exhaustive()
    }
}

impl ScopedConfig {
    pub fn new(
        node: Arc<dyn KeyValueBucket>,
        workflow: Arc<dyn KeyValueBucket>,
        project: Arc<dyn KeyValueBucket>,
    ) -> Self {
        Self {
            node,
            workflow,
            project,
        }
    }

    fn bucket(&self, scope: Scope) -> &dyn KeyValueBucket {
        match scope {
            Scope::Node => self.node.as_ref(),
            Scope::Workflow => self.workflow.as_ref(),
            Scope::Project => self.project.as_ref(),
        }
    }

    /// Look up `key` in `scope`, or across all scopes when `scope` is `None`.
    ///
    /// An explicit scope miss is `NotFound`; a miss everywhere is
    /// `NotFoundAnyScope`. Backend failures other than a miss stop the search.
    pub async fn get(&self, key: &str, scope: Option<Scope>) -> Result<String> {
        if let Some(scope) = scope {
            return self.get_in(key, scope).await;
        }

        for scope in Scope::SEARCH_ORDER {
            match self.get_in(key, scope).await {
                Ok(value) => return Ok(value),
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(key = %key, "Config key not found in any scope");
        Err(Error::NotFoundAnyScope(key.to_string()))
    }

    async fn get_in(&self, key: &str, scope: Scope) -> Result<String> {
        let value = self
            .bucket(scope)
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
                scope,
            })?;

        String::from_utf8(value.to_vec())
            .map_err(|_| Error::storage(format!("value of {key:?} in {scope} scope is not UTF-8")))
    }

    /// Store `value` under `key` in the node scope.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_in(key, value, Scope::default()).await
    }

    pub async fn set_in(&self, key: &str, value: &str, scope: Scope) -> Result<()> {
        validate_key(key)?;
        self.bucket(scope)
            .put(key, Bytes::copy_from_slice(value.as_bytes()))
            .await?;
        tracing::debug!(key = %key, scope = %scope, "Config value set");
        Ok(())
    }

    /// Remove `key` from the node scope.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.delete_in(key, Scope::default()).await
    }

    pub async fn delete_in(&self, key: &str, scope: Scope) -> Result<()> {
        validate_key(key)?;
        self.bucket(scope).delete(key).await?;
        tracing::debug!(key = %key, scope = %scope, "Config value deleted");
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("config key cannot be empty"));
    }
    Ok(())
}
