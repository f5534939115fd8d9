use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{ContentDigest, CoreError, Result};

use super::{ContentBackend, DigestLocks, DigestPin, PinSet, ReferenceIndex};

/// In-memory content store with the same semantics as the disk store.
/// Useful for tests and short-lived embedding.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentDigest, Vec<u8>>>,
    capacity: Option<u64>,
    pins: PinSet,
    locks: DigestLocks,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.capacity = Some(capacity_bytes);
        self
    }
}

#[async_trait]
impl ContentBackend for MemoryContentStore {
    async fn put(&self, data: &[u8]) -> Result<ContentDigest> {
        let digest = ContentDigest::of(data);
        let lock = self.locks.for_digest(&digest);
        let _guard = lock.lock().await;

        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(&digest) {
            return Ok(digest);
        }
        if let Some(capacity) = self.capacity {
            let used: u64 = blobs.values().map(|b| b.len() as u64).sum();
            if used + data.len() as u64 > capacity {
                return Err(CoreError::StorageFull(format!(
                    "{} bytes needed, {used} of {capacity} in use",
                    data.len()
                )));
            }
        }
        blobs.insert(digest.clone(), data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(digest)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("blob {digest}")))
    }

    async fn contains(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(digest))
    }

    async fn delete_if_unreferenced(
        &self,
        digest: &ContentDigest,
        index: &dyn ReferenceIndex,
    ) -> Result<bool> {
        let lock = self.locks.for_digest(digest);
        let _guard = lock.lock().await;

        if self.pins.is_pinned(digest) {
            return Ok(false);
        }
        if index.digest_referenced(digest).await? {
            return Ok(false);
        }
        Ok(self.blobs.write().await.remove(digest).is_some())
    }

    fn pin(&self, digest: &ContentDigest) -> DigestPin {
        self.pins.pin(digest)
    }

    async fn usage(&self) -> Result<u64> {
        Ok(self.blobs.read().await.values().map(|b| b.len() as u64).sum())
    }
}
