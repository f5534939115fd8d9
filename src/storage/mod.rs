pub mod cache;
pub mod compression;
pub mod disk;
pub mod encryption;
pub mod memory;
pub mod retry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ContentDigest, Result};

/// Answers whether any live file record references a digest. Implemented by
/// the metadata store; the content store queries it inside its per-digest
/// lock so the reference check and the physical delete cannot interleave
/// with a concurrent insert.
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    async fn digest_referenced(&self, digest: &ContentDigest) -> Result<bool>;
}

/// Content-addressed blob storage. `put` is idempotent: the physical write
/// happens only on the first occurrence of a digest, later writers detect
/// the existing blob and short-circuit.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    async fn put(&self, data: &[u8]) -> Result<ContentDigest>;

    /// Fails with `NotFound` when no blob with that digest exists, and with
    /// `Corrupt` when verify-on-read is enabled and the bytes no longer
    /// match the digest.
    async fn get(&self, digest: &ContentDigest) -> Result<Vec<u8>>;

    async fn contains(&self, digest: &ContentDigest) -> Result<bool>;

    /// Removes the physical blob only when no live file references it and
    /// it is not pinned by an in-flight upload. Returns whether a blob was
    /// actually removed.
    async fn delete_if_unreferenced(
        &self,
        digest: &ContentDigest,
        index: &dyn ReferenceIndex,
    ) -> Result<bool>;

    /// Pins a digest so reclamation skips it. The file service holds the pin
    /// from before `put` until the metadata row referencing the digest is
    /// committed, closing the window where a concurrent delete would see the
    /// fresh blob as unreferenced.
    fn pin(&self, digest: &ContentDigest) -> DigestPin;

    /// Total bytes physically stored.
    async fn usage(&self) -> Result<u64>;
}

/// Shared pin bookkeeping used by every backend. Counted, so overlapping
/// uploads of the same bytes each hold their own pin.
#[derive(Clone, Default)]
pub struct PinSet {
    pins: Arc<Mutex<HashMap<String, usize>>>,
}

impl PinSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, digest: &ContentDigest) -> DigestPin {
        let mut pins = self.pins.lock().expect("pin set poisoned");
        *pins.entry(digest.as_str().to_string()).or_insert(0) += 1;
        DigestPin {
            pins: Arc::clone(&self.pins),
            digest: digest.as_str().to_string(),
        }
    }

    pub fn is_pinned(&self, digest: &ContentDigest) -> bool {
        self.pins
            .lock()
            .expect("pin set poisoned")
            .contains_key(digest.as_str())
    }
}

/// RAII pin on one digest; dropping it releases the pin.
pub struct DigestPin {
    pins: Arc<Mutex<HashMap<String, usize>>>,
    digest: String,
}

impl Drop for DigestPin {
    fn drop(&mut self) {
        let mut pins = self.pins.lock().expect("pin set poisoned");
        if let Some(count) = pins.get_mut(&self.digest) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.digest);
            }
        }
    }
}

/// Per-digest write serialization: concurrent `put`s of identical bytes and
/// reclamation of the same digest take the same lock.
#[derive(Clone, Default)]
pub(crate) struct DigestLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DigestLocks {
    pub(crate) fn for_digest(&self, digest: &ContentDigest) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("digest lock map poisoned");
        // Sweep locks nobody holds anymore (strong count 1 means only the
        // map references the Arc), keeping the map proportional to in-flight
        // digests rather than every digest ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(digest.as_str().to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().expect("digest lock map poisoned").len()
    }
}
