//! In-process cache for hot read models
//!
//! Values are stored as JSON so any serializable read model fits; the tag
//! cloud and the home page listing are the main tenants. Keys are namespaced
//! with a `prefix:` so writes can drop a whole family at once.

use anyhow::{Context, Result};
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

const MAX_CAPACITY: u64 = 10_000;

pub mod keys {
    pub const TAGS_GROUPED: &str = "tags:grouped";
    pub const HOME_PREFIX: &str = "home:";
    pub const BLUEPRINT_LISTS_PREFIX: &str = "list:";
}

#[derive(Clone)]
pub struct Cache {
    inner: MokaCache<String, Arc<String>>,
    ttl: Duration,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entry_count", &self.inner.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(MAX_CAPACITY)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        Self { inner, ttl }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_seconds.max(1)))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key).await {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to deserialize cache entry {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        self.inner.insert(key.to_string(), Arc::new(json)).await;
        Ok(())
    }

    /// Return the cached value or compute, store and return it
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match self.get(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable cache entry {}: {:#}", key, e),
        }

        let value = load().await?;
        self.set(key, &value).await?;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Drop every key starting with `prefix`
    pub fn delete_prefix(&self, prefix: &str) {
        let prefix = prefix.to_string();
        if let Err(e) = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!("Failed to invalidate cache entries: {}", e);
        }
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = Cache::default();
        let entry = Entry { name: "water".into(), count: 3 };

        cache.set("tags:one", &entry).await.unwrap();
        assert_eq!(cache.get::<Entry>("tags:one").await.unwrap(), Some(entry));

        cache.delete("tags:one").await;
        assert_eq!(cache.get::<Entry>("tags:one").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache = Cache::default();
        cache.set("home:1", &1).await.unwrap();
        cache.set("home:2", &2).await.unwrap();
        cache.set("tags:grouped", &3).await.unwrap();

        cache.delete_prefix("home:");
        cache.inner.run_pending_tasks().await;

        assert_eq!(cache.get::<i32>("home:1").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("tags:grouped").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_get_or_load_caches_result() {
        let cache = Cache::default();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Vec<String> = cache
                .get_or_load("tags:grouped", || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(vec!["a".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["a".to_string()]);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let cache = Cache::default();
        cache.set("k", &"text").await.unwrap();
        assert!(cache.get::<u32>("k").await.is_err());
    }
}
