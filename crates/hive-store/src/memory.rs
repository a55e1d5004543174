use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;

/// In-memory hot cache backed by moka.
///
/// Holds recently read values in front of SQLite. Entries are evicted after TTL.
pub struct MemoryCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache: MemoryCache<(String, bool), String> =
            MemoryCache::new(100, Duration::from_secs(60));
        cache
            .insert(("alice".to_string(), false), "main".to_string())
            .await;

        assert_eq!(
            cache.get(&("alice".to_string(), false)).await,
            Some("main".to_string())
        );
        assert_eq!(cache.get(&("alice".to_string(), true)).await, None);
    }

    #[tokio::test]
    async fn invalidate() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(100, Duration::from_secs(60));
        cache.insert("alice".to_string(), 1).await;
        cache.invalidate(&"alice".to_string()).await;

        assert_eq!(cache.get(&"alice".to_string()).await, None);
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(100, Duration::from_millis(50));
        cache.insert("alice".to_string(), 1).await;
        assert!(cache.get(&"alice".to_string()).await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&"alice".to_string()).await.is_none());
    }
}
