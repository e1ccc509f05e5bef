//! Access credentials for the upstream source.
//!
//! The cache stores the token opaquely; fetchers resolve one through the
//! [`CredentialProvider`] seam so the transport never cares whether the token
//! came from config, the environment, or a previous login stored in the
//! cache. [`AccessToken`] redacts itself in `Debug`/`Display` output so
//! tokens never land in logs verbatim.

use crate::cache::SnapshotCache;
use crate::error::{PulseError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opaque bearer token for the upstream source.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token value, for building request headers.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([redacted])")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Supplies the token used to authenticate the next fetch.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a token, or an error when none is available.
    async fn access_token(&self) -> Result<AccessToken>;
}

/// Fixed token taken from configuration or the environment.
pub struct StaticCredentials {
    token: AccessToken,
}

impl StaticCredentials {
    /// Create a provider that always returns `token`.
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// Create a provider from a raw token string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self::new(AccessToken::new(raw))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Provider that reads whatever token the cache currently holds.
///
/// The serving layer stores the token at login via
/// [`CacheGuard::set_credential`](crate::cache::CacheGuard::set_credential);
/// later fetches pick it up from here without a fresh handshake.
pub struct CachedCredentials<S> {
    cache: Arc<SnapshotCache<S>>,
}

impl<S> CachedCredentials<S> {
    /// Create a provider backed by `cache`.
    pub fn new(cache: Arc<SnapshotCache<S>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<S: Send> CredentialProvider for CachedCredentials<S> {
    async fn access_token(&self) -> Result<AccessToken> {
        self.cache.lock().credential().ok_or_else(|| {
            PulseError::Credential("no access token stored in cache".to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    #[test]
    fn debug_and_display_redact_the_token() {
        let token = AccessToken::new("very-secret-value");
        assert!(!format!("{token:?}").contains("very-secret-value"));
        assert!(!format!("{token}").contains("very-secret-value"));
        assert_eq!(token.as_str(), "very-secret-value");
    }

    #[tokio::test]
    async fn static_credentials_return_the_configured_token() {
        let provider = StaticCredentials::from_raw("abc123");
        let token = provider.access_token().await.unwrap();
        assert_eq!(token.as_str(), "abc123");
    }

    #[tokio::test]
    async fn cached_credentials_read_the_stored_token() {
        let cache: Arc<SnapshotCache<String>> =
            Arc::new(SnapshotCache::new(Duration::from_secs(300)));
        cache.lock().set_credential(AccessToken::new("stored"));

        let provider = CachedCredentials::new(Arc::clone(&cache));
        let token = provider.access_token().await.unwrap();
        assert_eq!(token.as_str(), "stored");
    }

    #[tokio::test]
    async fn cached_credentials_error_when_cache_is_empty() {
        let cache: Arc<SnapshotCache<String>> =
            Arc::new(SnapshotCache::new(Duration::from_secs(300)));
        let provider = CachedCredentials::new(cache);
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, PulseError::Credential(_)));
    }
}
