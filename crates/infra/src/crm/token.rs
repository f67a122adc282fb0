use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Provider access token. `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CrmToken {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// True once `now + margin` has reached the expiry.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }
}

impl fmt::Debug for CrmToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmToken")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Error)]
pub enum TokenStoreError {
    #[error("token store error: {0}")]
    Storage(String),

    #[error("token could not be decoded: {0}")]
    Serialization(String),

    #[error("token fetch failed: {0}")]
    Fetch(String),
}

/// Expiring token cache keyed by credential name.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Unexpired token for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<CrmToken>, TokenStoreError>;
    async fn put(&self, key: &str, token: &CrmToken) -> Result<(), TokenStoreError>;
    async fn invalidate(&self, key: &str) -> Result<(), TokenStoreError>;
}

/// Obtains a fresh token from the provider.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<CrmToken>;
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, CrmToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<CrmToken>, TokenStoreError> {
        let now = Utc::now();
        Ok(self
            .tokens
            .read()
            .unwrap()
            .get(key)
            .filter(|t| !t.expires_within(now, Duration::zero()))
            .cloned())
    }

    async fn put(&self, key: &str, token: &CrmToken) -> Result<(), TokenStoreError> {
        self.tokens
            .write()
            .unwrap()
            .insert(key.to_string(), token.clone());
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), TokenStoreError> {
        self.tokens.write().unwrap().remove(key);
        Ok(())
    }
}

/// Hands out a cached token and refreshes it through the fetcher only when it
/// is missing or about to expire. Concurrent callers share one refresh.
pub struct CachedTokenProvider {
    store: Arc<dyn TokenStore>,
    fetcher: Arc<dyn TokenFetcher>,
    key: String,
    refresh_margin: Duration,
    refresh: Mutex<()>,
}

impl CachedTokenProvider {
    pub fn new(store: Arc<dyn TokenStore>, fetcher: Arc<dyn TokenFetcher>, key: impl Into<String>) -> Self {
        Self {
            store,
            fetcher,
            key: key.into(),
            refresh_margin: Duration::seconds(60),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub async fn access_token(&self) -> Result<String, TokenStoreError> {
        if let Some(token) = self.cached().await {
            return Ok(token.access_token);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached().await {
            return Ok(token.access_token);
        }

        let token = self
            .fetcher
            .fetch()
            .await
            .map_err(|e| TokenStoreError::Fetch(format!("{e:#}")))?;
        if let Err(e) = self.store.put(&self.key, &token).await {
            warn!(key = %self.key, error = %e, "failed to cache CRM token");
        }
        debug!(key = %self.key, expires_at = %token.expires_at, "refreshed CRM token");
        Ok(token.access_token)
    }

    /// Drop the cached token, e.g. after the provider rejected it.
    pub async fn invalidate(&self) -> Result<(), TokenStoreError> {
        self.store.invalidate(&self.key).await
    }

    async fn cached(&self) -> Option<CrmToken> {
        match self.store.get(&self.key).await {
            Ok(Some(token)) if !token.expires_within(Utc::now(), self.refresh_margin) => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "token store unavailable; fetching directly");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
        lifetime: Duration,
    }

    impl CountingFetcher {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                lifetime,
            })
        }
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch(&self) -> anyhow::Result<CrmToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CrmToken::new(format!("token-{n}"), Utc::now() + self.lifetime))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl TokenFetcher for FailingFetcher {
        async fn fetch(&self) -> anyhow::Result<CrmToken> {
            anyhow::bail!("invalid client credentials")
        }
    }

    #[tokio::test]
    async fn fetches_once_then_serves_from_cache() {
        let fetcher = CountingFetcher::new(Duration::hours(1));
        let provider =
            CachedTokenProvider::new(Arc::new(InMemoryTokenStore::new()), fetcher.clone(), "crm");

        assert_eq!(provider.access_token().await.unwrap(), "token-1");
        assert_eq!(provider.access_token().await.unwrap(), "token-1");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_tokens_inside_the_margin() {
        let fetcher = CountingFetcher::new(Duration::seconds(30));
        let provider =
            CachedTokenProvider::new(Arc::new(InMemoryTokenStore::new()), fetcher.clone(), "crm")
                .with_refresh_margin(Duration::seconds(60));

        provider.access_token().await.unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let fetcher = CountingFetcher::new(Duration::hours(1));
        let provider =
            CachedTokenProvider::new(Arc::new(InMemoryTokenStore::new()), fetcher.clone(), "crm");

        provider.access_token().await.unwrap();
        provider.invalidate().await.unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn providers_do_not_share_state_unless_they_share_a_store() {
        let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
        let fetcher = CountingFetcher::new(Duration::hours(1));
        let a = CachedTokenProvider::new(store.clone(), fetcher.clone(), "crm");
        let b = CachedTokenProvider::new(store, fetcher.clone(), "crm");
        let c = CachedTokenProvider::new(
            Arc::new(InMemoryTokenStore::new()),
            fetcher.clone(),
            "crm",
        );

        a.access_token().await.unwrap();
        b.access_token().await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        c.access_token().await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failures_surface_as_fetch_errors() {
        let provider = CachedTokenProvider::new(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(FailingFetcher),
            "crm",
        );
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, TokenStoreError::Fetch(ref m) if m.contains("invalid client")));
    }

    #[test]
    fn debug_redacts_the_token() {
        let token = CrmToken::new("sk_live_abc", Utc::now());
        assert!(!format!("{token:?}").contains("sk_live_abc"));
    }
}
