//! Credential cache collaborator.
//!
//! The SAML flow never touches the cache itself; it only produces the token a
//! caller may decide to keep. This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialCache`] - Trait for cache backends
//! - [`MemoryCache`] - Process-local implementation
//! - [`NullCache`] - Opt-out implementation that stores nothing
//! - [`KeyringCache`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_cache`] - Helper to select a backend
//!
//! # Key Convention
//!
//! Keys follow the pattern `samlgate/{app host}/session` for the session token
//! and `samlgate/{app host}/resource/{resource}` for derived per-resource tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
mod null;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryCache;
pub use null::NullCache;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCache;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose) and is
/// wiped from memory when dropped. Debug and Display implementations show
/// `[REDACTED]` instead of the value.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Short-lived storage for the session token and per-resource derived tokens.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Store a value at the given key, overwriting any existing value.
    async fn put(&self, key: &str, value: &Secret) -> Result<(), StoreError>;

    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;
}

/// Cache key for the session token of an application.
pub fn session_key(app_url: &str) -> String {
    format!("samlgate/{}/session", app_key(app_url))
}

/// Cache key for a token derived for one resource of an application.
///
/// The login flow only produces the session token. This key is for callers
/// that exchange that token for per-resource credentials (for example a
/// cloud account session) and cache them next to it.
pub fn resource_key(app_url: &str, resource: &str) -> String {
    format!("samlgate/{}/resource/{}", app_key(app_url), resource)
}

fn app_key(app_url: &str) -> String {
    match url::Url::parse(app_url) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => app_url.trim_end_matches('/').to_string(),
        },
        Err(_) => app_url.trim_end_matches('/').to_string(),
    }
}

/// Create a credential cache.
///
/// - `enabled == false` returns a [`NullCache`].
/// - Otherwise, with the `keyring-store` feature, a [`KeyringCache`] is tried
///   first and [`MemoryCache`] is used with a warning if the keyring is
///   unavailable.
pub fn create_cache(enabled: bool) -> Box<dyn CredentialCache> {
    if !enabled {
        tracing::debug!("Credential caching disabled");
        return Box::new(NullCache);
    }

    #[cfg(feature = "keyring-store")]
    match KeyringCache::try_new("samlgate") {
        Ok(cache) => {
            tracing::debug!("Using OS keyring for credential cache");
            return Box::new(cache);
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory cache. \
                 Tokens will not persist across runs.",
                e
            );
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    tracing::warn!(
        "keyring-store feature not enabled. \
         Tokens will not persist across runs."
    );

    Box::new(MemoryCache::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("value");
        assert_eq!(secret.into_inner(), "value");
    }

    #[test]
    fn test_session_key_uses_host() {
        assert_eq!(session_key("https://app.example.com/"), "samlgate/app.example.com/session");
        assert_eq!(session_key("http://localhost:8080"), "samlgate/localhost:8080/session");
        assert_eq!(session_key("not a url/"), "samlgate/not a url/session");
    }

    #[test]
    fn test_resource_key() {
        assert_eq!(
            resource_key("https://app.example.com", "account-42"),
            "samlgate/app.example.com/resource/account-42"
        );
    }

    #[tokio::test]
    async fn test_create_cache_disabled_stores_nothing() {
        let cache = create_cache(false);

        cache.put("key", &Secret::new("value")).await.unwrap();
        assert!(cache.get("key").await.unwrap().is_none());
    }
}
