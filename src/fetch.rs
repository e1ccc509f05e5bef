//! Fetching snapshots from the upstream source.
//!
//! [`Fetcher`] is the seam between the cache and whatever produces fresh
//! data; [`refresh_with`](crate::cache::refresh_with) drives it. The stock
//! implementation is [`HttpFetcher`], which GETs a JSON document with an
//! optional bearer token.

use crate::config::SourceConfig;
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::{PulseError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Produces a fresh snapshot from the source of truth.
///
/// Implementations are free to take as long as they need; the cache
/// guarantees at most one fetch runs at a time.
#[async_trait]
pub trait Fetcher: Send + Sync {
    type Snapshot;

    async fn fetch(&self) -> Result<Self::Snapshot>;
}

/// Fetcher that GETs a JSON document over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpFetcher {
    /// Create a fetcher for `url` with default client settings and no
    /// credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            credentials: None,
        }
    }

    /// Create a fetcher from configuration.
    ///
    /// A non-empty `access_token` becomes a static bearer credential.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PulseError::Fetch(format!("failed to build HTTP client: {e}")))?;

        let credentials: Option<Arc<dyn CredentialProvider>> = if config.access_token.is_empty() {
            None
        } else {
            Some(Arc::new(StaticCredentials::from_raw(
                config.access_token.clone(),
            )))
        };

        Ok(Self {
            client,
            url: config.url.clone(),
            credentials,
        })
    }

    /// Authenticate requests with tokens from `credentials`.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    type Snapshot = serde_json::Value;

    async fn fetch(&self) -> Result<Self::Snapshot> {
        let mut request = self.client.get(&self.url);
        if let Some(credentials) = &self.credentials {
            let token = credentials.access_token().await?;
            request = request.header("Authorization", format!("Bearer {}", token.as_str()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PulseError::Fetch(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PulseError::Fetch(format!(
                "source returned {status} for {}",
                self.url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PulseError::Fetch(format!("invalid JSON from {}: {e}", self.url)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn empty_token_in_config_means_no_credentials() {
        let config = SourceConfig {
            url: "http://localhost/metrics".to_owned(),
            access_token: String::new(),
            request_timeout_secs: 5,
        };
        let fetcher = HttpFetcher::from_config(&config).unwrap();
        assert!(fetcher.credentials.is_none());
        assert_eq!(fetcher.url, "http://localhost/metrics");
    }

    #[test]
    fn configured_token_becomes_a_static_credential() {
        let config = SourceConfig {
            url: "http://localhost/metrics".to_owned(),
            access_token: "sekrit".to_owned(),
            request_timeout_secs: 5,
        };
        let fetcher = HttpFetcher::from_config(&config).unwrap();
        assert!(fetcher.credentials.is_some());
    }
}
