//! Small in-memory TTL cache for upstream price lookups

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Shared map whose entries expire `ttl` after insertion
pub struct TtlCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Unexpired value for `key`
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_entries_hit() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("KRW-BTC".to_string(), 1.5).await;
        assert_eq!(cache.get(&"KRW-BTC".to_string()).await, Some(1.5));
        assert_eq!(cache.get(&"KRW-ETH".to_string()).await, None);
    }

    #[tokio::test]
    async fn zero_ttl_never_hits_and_purges() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u32, "x").await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let other = cache.clone();
        other.insert(("BTC".to_string(), 7), 3.0).await;
        assert_eq!(cache.get(&("BTC".to_string(), 7)).await, Some(3.0));
    }
}
