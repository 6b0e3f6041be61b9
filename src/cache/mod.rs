//! Two-tier response cache.
//!
//! ```text
//! CacheStore
//!   ├── primary: PrimaryStore (Redis)   <- used whenever it reports ready
//!   └── local:   LocalStore   (Moka)    <- used otherwise, and on any primary failure
//! ```
//!
//! Store failures never reach callers; the cache then simply behaves like a
//! cold one. Concurrent misses for the same key are not coalesced: each
//! caller computes and writes on its own and the last write wins.

mod local;
mod primary;

pub use local::LocalStore;
pub use primary::{PrimaryStore, RedisConnection};

#[cfg(test)]
pub use primary::MockPrimaryStore;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Namespace prepended to every key in both tiers.
pub const KEY_PREFIX: &str = "http-request-retry";

enum Tier<'a> {
    Primary(&'a dyn PrimaryStore),
    Local,
}

#[derive(Clone)]
pub struct CacheStore {
    primary: Option<Arc<dyn PrimaryStore>>,
    local: LocalStore,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("primary", &self.primary.as_ref().map(|p| p.name()))
            .field("local", &self.local)
            .finish()
    }
}

impl CacheStore {
    pub fn new(primary: Arc<dyn PrimaryStore>, local: LocalStore) -> Self {
        Self {
            primary: Some(primary),
            local,
        }
    }

    /// A cache without a primary tier.
    pub fn local_only(local: LocalStore) -> Self {
        Self {
            primary: None,
            local,
        }
    }

    fn tier(&self) -> Tier<'_> {
        match &self.primary {
            Some(primary) if primary.is_ready() => Tier::Primary(primary.as_ref()),
            Some(primary) => {
                debug!("{} is not ready, using local cache", primary.name());
                Tier::Local
            }
            None => Tier::Local,
        }
    }

    fn namespaced(key: &str) -> String {
        format!("{}-{}", KEY_PREFIX, key)
    }

    /// Reads the raw text stored under `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        let key = Self::namespaced(key);

        if let Tier::Primary(primary) = self.tier() {
            match primary.get(&key).await {
                Ok(value) => return value,
                Err(e) => warn!("get cache fallback - {:#}", e),
            }
        }

        self.local.get(&key).await
    }

    /// Stores raw text under `key` for `ttl_seconds`.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) {
        let key = Self::namespaced(key);
        let ttl = Duration::from_secs(ttl_seconds);

        if let Tier::Primary(primary) = self.tier() {
            match primary.set_ex(&key, value, ttl).await {
                Ok(()) => return,
                Err(e) => warn!("set cache fallback - {:#}", e),
            }
        }

        self.local.put(&key, value.to_string(), ttl).await;
    }

    /// Returns the cached value for `key`, or runs `producer` and caches its
    /// result for `ttl_seconds`.
    ///
    /// Producer errors are returned unchanged and nothing is stored. Cached
    /// text that no longer deserializes counts as a miss.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(text) = self.get(key).await {
            match serde_json::from_str(&text) {
                Ok(value) => {
                    debug!("Cache hit for {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("Discarding unreadable cache entry {}: {}", key, e),
            }
        }

        let value = producer().await?;

        match serde_json::to_string(&value) {
            Ok(text) => self.set(key, &text, ttl_seconds).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use mockall::predicate::eq;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local() -> LocalStore {
        LocalStore::new(100)
    }

    #[tokio::test]
    async fn test_miss_computes_and_hit_reuses() {
        let cache = CacheStore::local_only(local());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Value = cache
                .get_or_compute("key", 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(json!({"succes": "ok"}))
                })
                .await
                .unwrap();
            assert_eq!(value, json!({"succes": "ok"}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_is_returned_and_not_stored() {
        let cache = CacheStore::local_only(local());

        let result: Result<Value, anyhow::Error> = cache
            .get_or_compute("key", 60, || async { Err(anyhow!("upstream down")) })
            .await;
        assert_eq!(result.unwrap_err().to_string(), "upstream down");
        assert_eq!(cache.get("key").await, None);

        let value: Value = cache
            .get_or_compute("key", 60, || async { Ok::<_, anyhow::Error>(json!(1)) })
            .await
            .unwrap();
        assert_eq!(value, json!(1));
    }

    #[tokio::test]
    async fn test_unreadable_entry_counts_as_miss() {
        let cache = CacheStore::local_only(local());
        cache.set("key", "not json", 60).await;

        let value: Value = cache
            .get_or_compute("key", 60, || async { Ok::<_, anyhow::Error>(json!("fresh")) })
            .await
            .unwrap();
        assert_eq!(value, json!("fresh"));
        assert_eq!(cache.get("key").await, Some(r#""fresh""#.to_string()));
    }

    #[tokio::test]
    async fn test_ready_primary_is_used_with_ttl_in_seconds() {
        let mut primary = MockPrimaryStore::new();
        primary.expect_is_ready().return_const(true);
        primary
            .expect_get()
            .with(eq("http-request-retry-key"))
            .times(1)
            .returning(|_| Ok(None));
        primary
            .expect_set_ex()
            .with(
                eq("http-request-retry-key"),
                eq(r#"{"succes":"ok"}"#),
                eq(Duration::from_secs(60)),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let local = local();
        let cache = CacheStore::new(Arc::new(primary), local.clone());
        let value: Value = cache
            .get_or_compute("key", 60, || async {
                Ok::<_, anyhow::Error>(json!({"succes": "ok"}))
            })
            .await
            .unwrap();

        assert_eq!(value, json!({"succes": "ok"}));
        assert_eq!(local.get("http-request-retry-key").await, None);
    }

    #[tokio::test]
    async fn test_primary_hit_skips_producer() {
        let mut primary = MockPrimaryStore::new();
        primary.expect_is_ready().return_const(true);
        primary
            .expect_get()
            .returning(|_| Ok(Some(r#"{"cached":true}"#.to_string())));
        primary.expect_set_ex().never();

        let cache = CacheStore::new(Arc::new(primary), local());
        let calls = AtomicUsize::new(0);
        let value: Value = cache
            .get_or_compute("key", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Value::Null)
            })
            .await
            .unwrap();

        assert_eq!(value, json!({"cached": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_not_ready_primary_degrades_to_local() {
        let mut primary = MockPrimaryStore::new();
        primary.expect_is_ready().return_const(false);
        primary.expect_name().return_const("redis");
        primary.expect_get().never();
        primary.expect_set_ex().never();

        let local = local();
        let cache = CacheStore::new(Arc::new(primary), local.clone());
        cache.set("key", "\"value\"", 60).await;

        assert_eq!(cache.get("key").await, Some("\"value\"".to_string()));
        assert_eq!(
            local.get("http-request-retry-key").await,
            Some("\"value\"".to_string())
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_primary_degrades_to_local() {
        let mut primary = MockPrimaryStore::new();
        primary.expect_is_ready().return_const(true);
        primary
            .expect_get()
            .returning(|_| Err(anyhow!("connection reset")));
        primary
            .expect_set_ex()
            .returning(|_, _, _| Err(anyhow!("connection reset")));

        let cache = CacheStore::new(Arc::new(primary), local());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Value = cache
                .get_or_compute("key", 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(json!([1, 2, 3]))
                })
                .await
                .unwrap();
            assert_eq!(value, json!([1, 2, 3]));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_each_compute() {
        let cache = CacheStore::local_only(local());
        let calls = AtomicUsize::new(0);
        let producer = |value: u32, delay_ms: u64| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, anyhow::Error>(json!(value))
            }
        };

        let (first, second) = tokio::join!(
            cache.get_or_compute("key", 60, producer(1, 50)),
            cache.get_or_compute("key", 60, producer(2, 150)),
        );

        assert_eq!(first.unwrap(), json!(1));
        assert_eq!(second.unwrap(), json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("key").await, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_local_entries_expire_with_ttl() {
        let cache = CacheStore::local_only(local());
        cache.set("key", "1", 1).await;
        assert_eq!(cache.get("key").await, Some("1".to_string()));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("key").await, None);
    }

    #[test]
    fn test_debug_names_primary_tier() {
        let mut primary = MockPrimaryStore::new();
        primary.expect_name().return_const("redis");
        let cache = CacheStore::new(Arc::new(primary), local());
        assert!(format!("{:?}", cache).contains("redis"));
    }
}
