//! Credential/token cache with refresh-on-expiry.
//!
//! The external market-data API authenticates in two steps: a credentials
//! exchange yields a long-lived refresh token, and the refresh token derives
//! a short-lived bearer id token. Both live in a pluggable TTL store so a
//! shared cache can back many workers.

use crate::error::{CacheError, TokenError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Cached credentials for one logical identity (e.g. an account email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Logical identity.
    pub key: String,
    /// Long-lived secret from the credentials exchange endpoint.
    pub refresh_token: String,
    /// Short-lived bearer derived from `refresh_token`.
    pub id_token: String,
    /// Instant past which `id_token` must not be used.
    pub id_token_expiry: DateTime<Utc>,
}

impl TokenRecord {
    /// Checks whether the id token is within `margin` of expiry.
    #[must_use]
    pub fn needs_refresh(&self, margin: ChronoDuration) -> bool {
        self.id_token_expiry < Utc::now() + margin
    }
}

/// A freshly derived bearer token.
#[derive(Debug, Clone)]
pub struct IdToken {
    /// The bearer value.
    pub token: String,
    /// When it stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Pluggable TTL-keyed string store.
///
/// Backs the token cache and the execution-policy lock service. Items
/// disappear after their TTL; `put_if_absent` is the atomic primitive the
/// lock service builds on.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Fetches a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores a value, replacing any previous one.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Stores a value only when the key is absent (or expired). Returns
    /// whether the write happened.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration)
    -> Result<bool, CacheError>;

    /// Removes a key.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process TTL store.
pub struct MemoryTtlStore {
    entries: StdMutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTtlStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        if let Some((_, expires)) = entries.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }

        entries.insert(key.to_string(), (value, now + ttl));
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Source of fresh tokens for the cache.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Exchanges configured credentials for a refresh token.
    async fn exchange_credentials(&self) -> Result<String, TokenError>;

    /// Derives a bearer id token from a refresh token.
    async fn refresh_id_token(&self, refresh_token: &str) -> Result<IdToken, TokenError>;
}

/// Safety margin before expiry within which a token is refreshed.
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Token cache with transparent, coalesced refresh.
pub struct TokenCache {
    store: Arc<dyn TtlStore>,
    provider: Arc<dyn TokenProvider>,
    refresh_margin: ChronoDuration,
    // Serializes refreshes so concurrent get_id_token calls coalesce into a
    // single provider round trip.
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    /// Creates a cache over a store and a provider.
    #[must_use]
    pub fn new(
        store: Arc<dyn TtlStore>,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            store,
            provider,
            refresh_margin: ChronoDuration::seconds(REFRESH_MARGIN_SECONDS),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a valid bearer token for `key`, refreshing if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the provider rejects both the
    /// refresh and the credentials exchange.
    pub async fn get_id_token(&self, key: &str) -> Result<String, TokenError> {
        if let Some(token) = self.cached_valid(key).await? {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited.
        if let Some(token) = self.cached_valid(key).await? {
            return Ok(token);
        }

        self.refresh_locked(key).await
    }

    /// Unconditionally refreshes the bearer token for `key`.
    ///
    /// Used by the API client after an authentication rejection.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh fails.
    pub async fn force_refresh(&self, key: &str) -> Result<String, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(key).await
    }

    async fn cached_valid(&self, key: &str) -> Result<Option<String>, TokenError> {
        let Some(raw) = self.store.get(&record_key(key)).await? else {
            return Ok(None);
        };

        let Ok(record) = serde_json::from_str::<TokenRecord>(&raw) else {
            // An undecodable record is dropped and refreshed from scratch.
            self.store.remove(&record_key(key)).await?;
            return Ok(None);
        };

        if record.needs_refresh(self.refresh_margin) {
            return Ok(None);
        }

        Ok(Some(record.id_token))
    }

    /// Refreshes while holding `refresh_lock`.
    async fn refresh_locked(&self, key: &str) -> Result<String, TokenError> {
        let existing = match self.store.get(&record_key(key)).await? {
            Some(raw) => serde_json::from_str::<TokenRecord>(&raw).ok(),
            None => None,
        };

        let refresh_token = match existing {
            Some(record) => record.refresh_token,
            None => self.provider.exchange_credentials().await?,
        };

        let id = match self.provider.refresh_id_token(&refresh_token).await {
            Ok(id) => id,
            Err(TokenError::RefreshFailed { .. }) => {
                // The refresh token itself may have expired; exchange once.
                let refreshed = self.provider.exchange_credentials().await?;
                let id = self.provider.refresh_id_token(&refreshed).await?;
                self.persist(key, refreshed, &id).await?;
                return Ok(id.token);
            }
            Err(e) => return Err(e),
        };

        self.persist(key, refresh_token, &id).await?;
        Ok(id.token)
    }

    async fn persist(
        &self,
        key: &str,
        refresh_token: String,
        id: &IdToken,
    ) -> Result<(), TokenError> {
        let record = TokenRecord {
            key: key.to_string(),
            refresh_token,
            id_token: id.token.clone(),
            id_token_expiry: id.expires_at,
        };

        let raw = serde_json::to_string(&record).map_err(|e| TokenError::StoreFailed {
            message: e.to_string(),
        })?;

        // Cache TTL stays just short of the token's own lifetime.
        let lifetime = (id.expires_at - Utc::now() - self.refresh_margin)
            .num_seconds()
            .max(1);
        self.store
            .put(&record_key(key), raw, Duration::from_secs(lifetime as u64))
            .await?;

        Ok(())
    }
}

fn record_key(key: &str) -> String {
    format!("token:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        exchanges: AtomicU32,
        refreshes: AtomicU32,
        lifetime: ChronoDuration,
    }

    impl CountingProvider {
        fn new(lifetime: ChronoDuration) -> Self {
            Self {
                exchanges: AtomicU32::new(0),
                refreshes: AtomicU32::new(0),
                lifetime,
            }
        }
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn exchange_credentials(&self) -> Result<String, TokenError> {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst);
            Ok(format!("refresh_{n}"))
        }

        async fn refresh_id_token(&self, refresh_token: &str) -> Result<IdToken, TokenError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(IdToken {
                token: format!("id_{refresh_token}_{n}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    fn cache_with(provider: Arc<CountingProvider>) -> TokenCache {
        TokenCache::new(Arc::new(MemoryTtlStore::new()), provider)
    }

    #[tokio::test]
    async fn first_call_exchanges_and_refreshes() {
        let provider = Arc::new(CountingProvider::new(ChronoDuration::hours(24)));
        let cache = cache_with(Arc::clone(&provider));

        let token = cache.get_id_token("trader@example.com").await.unwrap();
        assert!(token.starts_with("id_refresh_0"));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_call_hits_the_cache() {
        let provider = Arc::new(CountingProvider::new(ChronoDuration::hours(24)));
        let cache = cache_with(Arc::clone(&provider));

        let first = cache.get_id_token("trader@example.com").await.unwrap();
        let second = cache.get_id_token("trader@example.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_coalesce_into_one_refresh() {
        let provider = Arc::new(CountingProvider::new(ChronoDuration::hours(24)));
        let cache = Arc::new(cache_with(Arc::clone(&provider)));

        let calls = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_id_token("trader@example.com").await })
        });

        let tokens: Vec<String> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert!(tokens.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh_without_new_exchange() {
        let provider = Arc::new(CountingProvider::new(ChronoDuration::hours(24)));
        let store = Arc::new(MemoryTtlStore::new());
        let cache = TokenCache::new(store.clone(), Arc::clone(&provider) as Arc<dyn TokenProvider>);

        // Seed a record whose id token is already past the safety margin.
        let record = TokenRecord {
            key: "trader@example.com".to_string(),
            refresh_token: "seeded_refresh".to_string(),
            id_token: "stale".to_string(),
            id_token_expiry: Utc::now() + ChronoDuration::seconds(5),
        };
        store
            .put(
                "token:trader@example.com",
                serde_json::to_string(&record).unwrap(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let token = cache.get_id_token("trader@example.com").await.unwrap();
        assert!(token.starts_with("id_seeded_refresh"));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_ignores_valid_cache() {
        let provider = Arc::new(CountingProvider::new(ChronoDuration::hours(24)));
        let cache = cache_with(Arc::clone(&provider));

        let first = cache.get_id_token("trader@example.com").await.unwrap();
        let forced = cache.force_refresh("trader@example.com").await.unwrap();

        assert_ne!(first, forced);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 2);
        // The refresh token was reused, not re-exchanged.
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memory_store_ttl_expiry() {
        let store = MemoryTtlStore::new();
        store
            .put("k", "v".to_string(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_put_if_absent() {
        let store = MemoryTtlStore::new();

        assert!(
            store
                .put_if_absent("lock", "a".to_string(), Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert!(
            !store
                .put_if_absent("lock", "b".to_string(), Duration::from_secs(60))
                .await
                .unwrap()
        );

        store.remove("lock").await.unwrap();
        assert!(
            store
                .put_if_absent("lock", "c".to_string(), Duration::from_secs(60))
                .await
                .unwrap()
        );
    }
}
