use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::ReferenceIndex;
use crate::{ContentDigest, CoreError, FileRecord, FileUpdate, Result, SharePermission};

use super::MetadataStore;

const FILES_DOC: &str = "files.json";
const PERMISSIONS_DOC: &str = "permissions.json";

#[derive(Default)]
struct Tables {
    files: HashMap<Uuid, FileRecord>,
    permissions: HashMap<Uuid, SharePermission>,
    // (file_id, grantee_id) -> permission id; the uniqueness invariant.
    by_grant: HashMap<(Uuid, Uuid), Uuid>,
}

impl Tables {
    fn index_permissions(&mut self) {
        self.by_grant = self
            .permissions
            .values()
            .map(|p| ((p.file_id, p.grantee_id), p.id))
            .collect();
    }
}

/// Metadata store backed by in-memory tables behind a single RwLock; every
/// mutation runs under the write lock, which is what makes the uniqueness
/// and cascade invariants transactional. With a persistence directory set,
/// tables are written through to JSON documents and reloaded on open; a
/// failed write-through rolls the mutation back, so the in-memory state
/// never drifts ahead of the documents on disk.
pub struct MemoryMetadataStore {
    tables: RwLock<Tables>,
    persist_dir: Option<PathBuf>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            persist_dir: None,
        }
    }

    /// Opens a store persisted under `dir`, loading any existing documents.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir).await?;

        let mut tables = Tables::default();
        let files_path = dir.join(FILES_DOC);
        if fs::try_exists(&files_path).await? {
            let content = fs::read_to_string(&files_path).await?;
            let records: Vec<FileRecord> = serde_json::from_str(&content)
                .map_err(|e| CoreError::Storage(format!("failed to parse {FILES_DOC}: {e}")))?;
            tables.files = records.into_iter().map(|f| (f.id, f)).collect();
        }
        let permissions_path = dir.join(PERMISSIONS_DOC);
        if fs::try_exists(&permissions_path).await? {
            let content = fs::read_to_string(&permissions_path).await?;
            let rows: Vec<SharePermission> = serde_json::from_str(&content).map_err(|e| {
                CoreError::Storage(format!("failed to parse {PERMISSIONS_DOC}: {e}"))
            })?;
            tables.permissions = rows.into_iter().map(|p| (p.id, p)).collect();
        }
        tables.index_permissions();

        tracing::info!(
            path = %dir.display(),
            files = tables.files.len(),
            permissions = tables.permissions.len(),
            "metadata store opened"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            persist_dir: Some(dir),
        })
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };

        let files: Vec<&FileRecord> = tables.files.values().collect();
        let files_json = serde_json::to_string(&files)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        fs::write(dir.join(FILES_DOC), files_json).await?;

        let permissions: Vec<&SharePermission> = tables.permissions.values().collect();
        let permissions_json = serde_json::to_string(&permissions)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        fs::write(dir.join(PERMISSIONS_DOC), permissions_json).await?;
        Ok(())
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReferenceIndex for MemoryMetadataStore {
    async fn digest_referenced(&self, digest: &ContentDigest) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.files.values().any(|f| f.content_digest == *digest))
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_file(&self, record: FileRecord) -> Result<FileRecord> {
        let mut tables = self.tables.write().await;
        if tables.files.contains_key(&record.id) {
            return Err(CoreError::Conflict(format!("file {} already exists", record.id)));
        }
        tables.files.insert(record.id, record.clone());
        if let Err(e) = self.persist(&tables).await {
            tables.files.remove(&record.id);
            return Err(e);
        }
        Ok(record)
    }

    async fn file(&self, id: Uuid) -> Result<FileRecord> {
        let tables = self.tables.read().await;
        tables
            .files
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("file {id}")))
    }

    async fn update_file(&self, id: Uuid, update: FileUpdate) -> Result<FileRecord> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .files
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("file {id}")))?;

        let mut updated = previous.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(size) = update.size {
            updated.size = size;
        }
        if let Some(content_type) = update.content_type {
            updated.content_type = content_type;
        }
        if let Some(digest) = update.content_digest {
            updated.content_digest = digest;
        }
        updated.updated_at = Utc::now();

        tables.files.insert(id, updated.clone());
        if let Err(e) = self.persist(&tables).await {
            tables.files.insert(id, previous);
            return Err(e);
        }
        Ok(updated)
    }

    async fn delete_file(&self, id: Uuid) -> Result<FileRecord> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .files
            .remove(&id)
            .ok_or_else(|| CoreError::NotFound(format!("file {id}")))?;

        // Cascade: a file's permissions never outlive it.
        let doomed: Vec<SharePermission> = tables
            .permissions
            .values()
            .filter(|p| p.file_id == id)
            .cloned()
            .collect();
        for p in &doomed {
            tables.permissions.remove(&p.id);
            tables.by_grant.remove(&(p.file_id, p.grantee_id));
        }

        if let Err(e) = self.persist(&tables).await {
            tables.files.insert(removed.id, removed);
            for p in doomed {
                tables.by_grant.insert((p.file_id, p.grantee_id), p.id);
                tables.permissions.insert(p.id, p);
            }
            return Err(e);
        }
        Ok(removed)
    }

    async fn files_by_owner(&self, owner_id: Uuid) -> Result<Vec<FileRecord>> {
        let tables = self.tables.read().await;
        let mut files: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn upsert_permission(&self, permission: SharePermission) -> Result<SharePermission> {
        let mut tables = self.tables.write().await;
        let pair = (permission.file_id, permission.grantee_id);

        let (stored, previous) = if let Some(&existing_id) = tables.by_grant.get(&pair) {
            let row = tables
                .permissions
                .get_mut(&existing_id)
                .expect("grant index out of sync with permission table");
            let previous = row.clone();
            row.permission_type = permission.permission_type;
            row.grantor_id = permission.grantor_id;
            row.grantee_email = permission.grantee_email;
            row.created_at = permission.created_at;
            (row.clone(), Some(previous))
        } else {
            tables.by_grant.insert(pair, permission.id);
            tables.permissions.insert(permission.id, permission.clone());
            (permission, None)
        };

        if let Err(e) = self.persist(&tables).await {
            match previous {
                Some(old) => {
                    tables.permissions.insert(old.id, old);
                }
                None => {
                    tables.by_grant.remove(&pair);
                    tables.permissions.remove(&stored.id);
                }
            }
            return Err(e);
        }
        Ok(stored)
    }

    async fn permission(&self, id: Uuid) -> Result<SharePermission> {
        let tables = self.tables.read().await;
        tables
            .permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("permission {id}")))
    }

    async fn permission_for_file(
        &self,
        file_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<SharePermission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_grant
            .get(&(file_id, user_id))
            .and_then(|id| tables.permissions.get(id))
            .cloned())
    }

    async fn permissions_granted_by(&self, user_id: Uuid) -> Result<Vec<SharePermission>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SharePermission> = tables
            .permissions
            .values()
            .filter(|p| p.grantor_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn permissions_granted_to(&self, user_id: Uuid) -> Result<Vec<SharePermission>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SharePermission> = tables
            .permissions
            .values()
            .filter(|p| p.grantee_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete_permission(&self, id: Uuid) -> Result<SharePermission> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .permissions
            .remove(&id)
            .ok_or_else(|| CoreError::NotFound(format!("permission {id}")))?;
        tables.by_grant.remove(&(removed.file_id, removed.grantee_id));
        if let Err(e) = self.persist(&tables).await {
            tables.by_grant.insert((removed.file_id, removed.grantee_id), removed.id);
            tables.permissions.insert(removed.id, removed);
            return Err(e);
        }
        Ok(removed)
    }

    fn as_index(&self) -> &dyn ReferenceIndex {
        self
    }
}
