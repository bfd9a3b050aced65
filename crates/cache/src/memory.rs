use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use moka::{Expiry, future::Cache};

use crate::store::KeyValueStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process store for single-instance deployments and tests.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, Entry>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    pub fn new() -> Self {
        let entries = Cache::builder()
            .max_capacity(100_000)
            .expire_after(EntryExpiry)
            .eviction_listener(|k, _v, cause| {
                tracing::debug!("Evicting cache key {} ({:?})", k, cause);
            })
            .build();
        Self { entries }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(key.to_string(), Entry { value: value.to_string(), ttl }).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.invalidate(key).await;
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(entry) = self.entries.get(key).await {
            self.entries.insert(key.to_string(), Entry { value: entry.value, ttl: Some(ttl) }).await;
        }
        Ok(())
    }
}
