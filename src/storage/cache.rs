use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::ContentDigest;

/// LRU cache of decoded blob bytes keyed by digest. Because the key is the
/// content digest, a cached entry can never go stale, only absent.
pub struct CacheManager {
    cache: Arc<Mutex<LruCache<ContentDigest, Vec<u8>>>>,
}

impl CacheManager {
    pub fn new(cache_size: usize) -> Self {
        let size = NonZeroUsize::new(cache_size.max(1)).expect("cache size is at least 1");
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(size))),
        }
    }

    pub async fn get(&self, digest: &ContentDigest) -> Option<Vec<u8>> {
        let mut cache = self.cache.lock().await;
        cache.get(digest).cloned()
    }

    pub async fn put(&self, digest: ContentDigest, data: Vec<u8>) {
        let mut cache = self.cache.lock().await;
        cache.put(digest, data);
    }

    pub async fn invalidate(&self, digest: &ContentDigest) {
        let mut cache = self.cache.lock().await;
        cache.pop(digest);
    }
}
