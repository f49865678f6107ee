//! Read-through query cache interface.
//!
//! The envelope consults the cache only for map-destination SELECTs carrying
//! an explicit cache key; results are marshalled with `serde_json`. Write
//! builders can name invalidation keys that are dropped after a successful
//! mutation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DbResult;

/// A user-provided cache backend.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Fetch a cached payload.
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Store a payload with a time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> DbResult<()>;

    /// Drop the given keys.
    async fn invalidate(&self, keys: &[String]) -> DbResult<()>;
}

/// An unbounded in-process cache. TTLs are honored lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, std::time::Instant)>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryCache for MemoryCache {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > std::time::Instant::now() => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> DbResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, std::time::Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate(&self, keys: &[String]) -> DbResult<()> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_invalidate_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache.invalidate(&["k".to_string()]).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
