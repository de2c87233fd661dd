//! In-memory credential cache.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CredentialCache, Secret, StoreError};

/// Process-local cache; data is lost when the process exits.
pub struct MemoryCache {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("keys_count", &self.data.read().len())
            .finish()
    }
}

#[async_trait]
impl CredentialCache for MemoryCache {
    async fn put(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_put_get() {
        let cache = MemoryCache::new();

        cache.put("samlgate/app/session", &Secret::new("token")).await.unwrap();
        let retrieved = cache.get("samlgate/app/session").await.unwrap();

        assert_eq!(retrieved.unwrap().expose(), "token");
    }

    #[tokio::test]
    async fn test_memory_cache_get_nonexistent() {
        let cache = MemoryCache::new();
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_overwrite() {
        let cache = MemoryCache::new();

        cache.put("key", &Secret::new("first")).await.unwrap();
        cache.put("key", &Secret::new("second")).await.unwrap();

        assert_eq!(cache.get("key").await.unwrap().unwrap().expose(), "second");
        assert!(format!("{:?}", cache).contains("keys_count: 1"));
    }
}
