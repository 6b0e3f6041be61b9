//! In-process fallback tier backed by Moka.
//!
//! Each entry carries its own TTL, so responses cached for different
//! durations can live side by side.

use log::debug;
use moka::Expiry;
use moka::future::Cache;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, LocalEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

#[derive(Clone)]
pub struct LocalStore {
    cache: Cache<String, LocalEntry>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl LocalStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    /// Stores `value` under `key` for `ttl`. The value and its expiry are
    /// written together.
    pub async fn put(&self, key: &str, value: String, ttl: Duration) {
        debug!("Local cache SET {} (ttl {}ms)", key, ttl.as_millis());
        self.cache
            .insert(key.to_string(), LocalEntry { value, ttl })
            .await;
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let value = self.cache.get(key).await.map(|entry| entry.value);
        debug!(
            "Local cache {} {}",
            if value.is_some() { "HIT" } else { "MISS" },
            key
        );
        value
    }
}
