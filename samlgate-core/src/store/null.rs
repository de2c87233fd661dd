//! Cache for callers that opt out of caching.

use async_trait::async_trait;

use super::{CredentialCache, Secret, StoreError};

/// Accepts every write and forgets it; every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

#[async_trait]
impl CredentialCache for NullCache {
    async fn put(&self, key: &str, _value: &Secret) -> Result<(), StoreError> {
        tracing::trace!(key, "null cache discarding value");
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_cache_always_misses() {
        let cache = NullCache;

        cache.put("key", &Secret::new("value")).await.unwrap();
        assert!(cache.get("key").await.unwrap().is_none());
    }
}
