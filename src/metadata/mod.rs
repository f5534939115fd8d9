//! Durable records for files and share permissions, with the invariants
//! enforced transactionally: one active permission per (file, grantee)
//! pair, cascade delete of permissions with their file, and queries that
//! observe a consistent snapshot.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::storage::ReferenceIndex;
use crate::{FileRecord, FileUpdate, Result, SharePermission};

pub use memory::MemoryMetadataStore;

#[async_trait]
pub trait MetadataStore: ReferenceIndex {
    /// Fails with `Conflict` when a record with the same id already exists.
    async fn insert_file(&self, record: FileRecord) -> Result<FileRecord>;

    async fn file(&self, id: Uuid) -> Result<FileRecord>;

    /// Applies the set fields and bumps `updated_at`.
    async fn update_file(&self, id: Uuid, update: FileUpdate) -> Result<FileRecord>;

    /// Removes the file and, in the same transaction, every permission on
    /// it. Returns the removed record.
    async fn delete_file(&self, id: Uuid) -> Result<FileRecord>;

    async fn files_by_owner(&self, owner_id: Uuid) -> Result<Vec<FileRecord>>;

    /// Creates or replaces the active permission for the row's (file,
    /// grantee) pair atomically. Re-sharing keeps the existing row id and
    /// takes the new grant's type, grantor, and timestamp
    /// (last-writer-wins).
    async fn upsert_permission(&self, permission: SharePermission) -> Result<SharePermission>;

    async fn permission(&self, id: Uuid) -> Result<SharePermission>;

    async fn permission_for_file(
        &self,
        file_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<SharePermission>>;

    async fn permissions_granted_by(&self, user_id: Uuid) -> Result<Vec<SharePermission>>;

    async fn permissions_granted_to(&self, user_id: Uuid) -> Result<Vec<SharePermission>>;

    async fn delete_permission(&self, id: Uuid) -> Result<SharePermission>;

    /// View of this store as the content store's reference index.
    fn as_index(&self) -> &dyn ReferenceIndex;
}
