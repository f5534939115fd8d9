use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::{ContentDigest, CoreError, Result};

use super::cache::CacheManager;
use super::compression::CompressionManager;
use super::encryption::EncryptionConfig;
use super::{ContentBackend, DigestLocks, DigestPin, PinSet, ReferenceIndex};

/// Content-addressed blob store on the local filesystem. Each unique blob
/// lives exactly once at `{base}/blobs/{digest}`; writes go through a temp
/// file plus rename so a blob is either fully present or absent.
pub struct DiskContentStore {
    blobs_path: PathBuf,
    used: AtomicU64,
    capacity: Option<u64>,
    op_timeout: Option<Duration>,
    verify_on_read: bool,
    cache: Option<CacheManager>,
    compression: Option<CompressionManager>,
    encryption: Option<EncryptionConfig>,
    pins: PinSet,
    locks: DigestLocks,
}

impl DiskContentStore {
    pub async fn open<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let blobs_path = base_path.as_ref().join("blobs");
        fs::create_dir_all(&blobs_path).await?;

        // Stored size is derived from the blobs on disk at open; puts and
        // reclamation keep it current afterwards.
        let mut used = 0u64;
        let mut entries = fs::read_dir(&blobs_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if ContentDigest::parse(&name.to_string_lossy()).is_ok() {
                used += entry.metadata().await?.len();
            }
        }
        tracing::info!(path = %blobs_path.display(), used_bytes = used, "content store opened");

        Ok(Self {
            blobs_path,
            used: AtomicU64::new(used),
            capacity: None,
            op_timeout: None,
            verify_on_read: false,
            cache: None,
            compression: None,
            encryption: None,
            pins: PinSet::new(),
            locks: DigestLocks::default(),
        })
    }

    /// Caps total stored bytes; `put` fails with `StorageFull` beyond it.
    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.capacity = Some(capacity_bytes);
        self
    }

    /// Bounds every filesystem call; a timeout surfaces as `Unavailable`.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    /// Recomputes the digest on every read and fails with `Corrupt` on
    /// mismatch.
    pub fn with_verify_on_read(mut self, enabled: bool) -> Self {
        self.verify_on_read = enabled;
        self
    }

    pub fn with_cache(mut self, cache_size: usize) -> Self {
        self.cache = Some(CacheManager::new(cache_size));
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = Some(CompressionManager::new(enabled));
        self
    }

    pub fn with_encryption(mut self, key: [u8; 32]) -> Self {
        self.encryption = Some(EncryptionConfig::new(key));
        self
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        self.blobs_path.join(digest.as_str())
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = match &self.compression {
            Some(compression) => compression.compress(data)?,
            None => data.to_vec(),
        };
        match &self.encryption {
            Some(encryption) => encryption.encrypt(&compressed),
            None => Ok(compressed),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decrypted = match &self.encryption {
            Some(encryption) => encryption.decrypt(data)?,
            None => data.to_vec(),
        };
        match &self.compression {
            Some(compression) => compression.decompress(&decrypted),
            None => Ok(decrypted),
        }
    }

    async fn io_op<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = io::Result<T>>,
    {
        match self.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(CoreError::from),
                Err(_) => Err(CoreError::Unavailable(
                    "storage operation timed out".to_string(),
                )),
            },
            None => fut.await.map_err(CoreError::from),
        }
    }
}

#[async_trait]
impl ContentBackend for DiskContentStore {
    async fn put(&self, data: &[u8]) -> Result<ContentDigest> {
        let digest = ContentDigest::of(data);
        let lock = self.locks.for_digest(&digest);
        let _guard = lock.lock().await;

        let path = self.blob_path(&digest);
        if self.io_op(fs::try_exists(&path)).await? {
            tracing::debug!(digest = %digest, "blob already present, deduplicated");
            return Ok(digest);
        }

        let encoded = self.encode(data)?;
        if let Some(capacity) = self.capacity {
            let used = self.used.load(Ordering::SeqCst);
            if used + encoded.len() as u64 > capacity {
                return Err(CoreError::StorageFull(format!(
                    "{} bytes needed, {used} of {capacity} in use",
                    encoded.len()
                )));
            }
        }

        // Temp file then rename keeps readers from ever seeing a partial
        // blob; the rename target is keyed by digest so retries converge.
        let tmp = self
            .blobs_path
            .join(format!("{}.tmp-{}", digest.as_str(), Uuid::new_v4()));
        self.io_op(fs::write(&tmp, &encoded)).await?;
        self.io_op(fs::rename(&tmp, &path)).await?;
        self.used.fetch_add(encoded.len() as u64, Ordering::SeqCst);

        if let Some(cache) = &self.cache {
            cache.put(digest.clone(), data.to_vec()).await;
        }
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> Result<Vec<u8>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(digest).await {
                return Ok(hit);
            }
        }

        let encoded = match self.io_op(fs::read(self.blob_path(digest))).await {
            Ok(bytes) => bytes,
            Err(CoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound(format!("blob {digest}")))
            }
            Err(e) => return Err(e),
        };

        let data = self.decode(&encoded)?;
        if self.verify_on_read {
            let actual = ContentDigest::of(&data);
            if actual != *digest {
                return Err(CoreError::Corrupt {
                    expected: digest.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        if let Some(cache) = &self.cache {
            cache.put(digest.clone(), data.clone()).await;
        }
        Ok(data)
    }

    async fn contains(&self, digest: &ContentDigest) -> Result<bool> {
        self.io_op(fs::try_exists(self.blob_path(digest))).await
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

        let path = self.blob_path(digest);
        let size = match self.io_op(fs::metadata(&path)).await {
            Ok(meta) => meta.len(),
            Err(CoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        self.io_op(fs::remove_file(&path)).await?;
        self.used.fetch_sub(size, Ordering::SeqCst);
        if let Some(cache) = &self.cache {
            cache.invalidate(digest).await;
        }
        tracing::debug!(digest = %digest, freed_bytes = size, "reclaimed unreferenced blob");
        Ok(true)
    }

    fn pin(&self, digest: &ContentDigest) -> DigestPin {
        self.pins.pin(digest)
    }

    async fn usage(&self) -> Result<u64> {
        Ok(self.used.load(Ordering::SeqCst))
    }
}
