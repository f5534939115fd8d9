//! Stateless orchestration over the content store, metadata store, and
//! audit log. Every operation authorizes against current store contents,
//! then mutates, then records an audit entry. Denied and failed attempts
//! are recorded too, with a non-Success outcome.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::access::{self, DenyReason, FileAction};
use crate::audit::{AuditFilter, AuditLogger, MemoryAuditStore};
use crate::metadata::{MemoryMetadataStore, MetadataStore};
use crate::storage::disk::DiskContentStore;
use crate::storage::ContentBackend;
use crate::{
    detect_content_type, AuditAction, AuditEntry, AuditOutcome, ContentDigest, CoreError,
    FileRecord, FileUpdate, PermissionType, Result, SharePermission,
};

/// Pre-validated caller identity, handed in by the transport layer. The core
/// trusts it; verifying tokens is the identity provider's job.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: Uuid,
    pub name: String,
    pub source_address: String,
}

impl Caller {
    pub fn new(id: Uuid, name: impl Into<String>, source_address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            source_address: source_address.into(),
        }
    }
}

pub struct FileService {
    content: Arc<dyn ContentBackend>,
    metadata: Arc<dyn MetadataStore>,
    audit: AuditLogger,
}

impl FileService {
    pub fn new(
        content: Arc<dyn ContentBackend>,
        metadata: Arc<dyn MetadataStore>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            content,
            metadata,
            audit,
        }
    }

    /// Opens a service persisted under `base`: blobs in `base/blobs`,
    /// metadata documents in `base/metadata`, audit journal at
    /// `base/audit.jsonl`.
    pub async fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let content = DiskContentStore::open(base).await?.with_verify_on_read(true);
        let metadata = MemoryMetadataStore::open(base.join("metadata")).await?;
        let audit = MemoryAuditStore::open(base.join("audit.jsonl")).await?;
        Ok(Self::new(
            Arc::new(content),
            Arc::new(metadata),
            AuditLogger::new(Arc::new(audit)),
        ))
    }

    /// Stores the bytes (deduplicated by digest), creates the metadata
    /// record, and logs UPLOAD. The digest stays pinned until the metadata
    /// row lands so concurrent reclamation cannot remove the fresh blob; if
    /// the metadata write fails, the orphaned blob is simply left for later
    /// reclamation; it is content-addressed and harmless to retain.
    pub async fn upload(
        &self,
        caller: &Caller,
        name: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<FileRecord> {
        let result = async {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidAction("file name must not be empty".to_string()));
            }

            let digest = ContentDigest::of(data);
            let _pin = self.content.pin(&digest);
            let stored = self.content.put(data).await?;

            let now = Utc::now();
            let record = FileRecord {
                id: Uuid::new_v4(),
                owner_id: caller.id,
                name: name.to_string(),
                size: data.len() as u64,
                content_type: content_type
                    .map(str::to_string)
                    .unwrap_or_else(|| detect_content_type(data)),
                content_digest: stored,
                created_at: now,
                updated_at: now,
            };
            self.metadata.insert_file(record).await
        }
        .await;

        let (file_id, file_name) = match &result {
            Ok(record) => (Some(record.id), Some(record.name.clone())),
            Err(_) => (None, Some(name.to_string())),
        };
        self.record(caller, file_id, file_name, AuditAction::Upload, outcome_of(&result))
            .await;
        result
    }

    /// Authorizes DOWNLOAD, fetches the blob, and logs the read intent.
    /// The DOWNLOAD entry is written whether or not the transport later
    /// delivers the bytes.
    pub async fn download(&self, caller: &Caller, file_id: Uuid) -> Result<(Vec<u8>, FileRecord)> {
        let record = match self.metadata.file(file_id).await {
            Ok(record) => record,
            Err(e) => {
                self.record(caller, Some(file_id), None, AuditAction::Download, outcome_of_err(&e))
                    .await;
                return Err(e);
            }
        };

        let result = async {
            self.authorize(caller.id, &record, FileAction::Download).await?;
            let bytes = self.content.get(&record.content_digest).await?;
            Ok((bytes, record.clone()))
        }
        .await;

        self.record(
            caller,
            Some(file_id),
            Some(record.name.clone()),
            AuditAction::Download,
            outcome_of(&result),
        )
        .await;
        result
    }

    /// Owner-only. Removes the record (permissions cascade with it), then
    /// reclaims the blob unless another file still references the digest.
    pub async fn delete(&self, caller: &Caller, file_id: Uuid) -> Result<()> {
        let record = match self.metadata.file(file_id).await {
            Ok(record) => record,
            Err(e) => {
                self.record(caller, Some(file_id), None, AuditAction::Delete, outcome_of_err(&e))
                    .await;
                return Err(e);
            }
        };

        let result = async {
            self.authorize(caller.id, &record, FileAction::Delete).await?;
            self.metadata.delete_file(file_id).await?;
            self.reclaim(&record.content_digest).await;
            Ok(())
        }
        .await;

        self.record(
            caller,
            Some(file_id),
            Some(record.name.clone()),
            AuditAction::Delete,
            outcome_of(&result),
        )
        .await;
        result
    }

    /// Grants or updates access for `grantee_id`. At most one active
    /// permission exists per (file, grantee); re-sharing replaces it
    /// (last-writer-wins on the permission type).
    pub async fn share(
        &self,
        caller: &Caller,
        file_id: Uuid,
        grantee_id: Uuid,
        grantee_email: &str,
        permission_type: PermissionType,
    ) -> Result<SharePermission> {
        let record = match self.metadata.file(file_id).await {
            Ok(record) => record,
            Err(e) => {
                self.record(caller, Some(file_id), None, AuditAction::Share, outcome_of_err(&e))
                    .await;
                return Err(e);
            }
        };

        let result = async {
            if grantee_id == record.owner_id {
                return Err(CoreError::InvalidAction(
                    "the file owner already has full access".to_string(),
                ));
            }
            self.authorize(caller.id, &record, FileAction::Share).await?;

            let permission = SharePermission {
                id: Uuid::new_v4(),
                file_id,
                grantor_id: caller.id,
                grantee_id,
                grantee_email: grantee_email.to_string(),
                permission_type,
                created_at: Utc::now(),
            };
            self.metadata.upsert_permission(permission).await
        }
        .await;

        self.record(
            caller,
            Some(file_id),
            Some(record.name.clone()),
            AuditAction::Share,
            outcome_of(&result),
        )
        .await;
        result
    }

    /// Removes a grant. Owners may revoke any grant on their files; ADMIN
    /// grantees may revoke grants of strictly lower rank only.
    pub async fn revoke(&self, caller: &Caller, permission_id: Uuid) -> Result<()> {
        let permission = match self.metadata.permission(permission_id).await {
            Ok(permission) => permission,
            Err(e) => {
                self.record(caller, None, None, AuditAction::Revoke, outcome_of_err(&e))
                    .await;
                return Err(e);
            }
        };
        let record = match self.metadata.file(permission.file_id).await {
            Ok(record) => record,
            Err(e) => {
                self.record(
                    caller,
                    Some(permission.file_id),
                    None,
                    AuditAction::Revoke,
                    outcome_of_err(&e),
                )
                .await;
                return Err(e);
            }
        };

        let result = async {
            self.authorize(
                caller.id,
                &record,
                FileAction::Revoke {
                    target: permission.permission_type,
                },
            )
            .await?;
            self.metadata.delete_permission(permission_id).await?;
            Ok(())
        }
        .await;

        self.record(
            caller,
            Some(record.id),
            Some(record.name.clone()),
            AuditAction::Revoke,
            outcome_of(&result),
        )
        .await;
        result
    }

    /// Replaces the file's content in place (WRITE or better). The record
    /// keeps its id; `updated_at` is bumped and the previous blob is
    /// reclaimed if nothing else references it. Audited as UPLOAD, since a
    /// replace is an upload of a new version.
    pub async fn replace(&self, caller: &Caller, file_id: Uuid, data: &[u8]) -> Result<FileRecord> {
        let record = match self.metadata.file(file_id).await {
            Ok(record) => record,
            Err(e) => {
                self.record(caller, Some(file_id), None, AuditAction::Upload, outcome_of_err(&e))
                    .await;
                return Err(e);
            }
        };

        let result = async {
            self.authorize(caller.id, &record, FileAction::Replace).await?;

            let digest = ContentDigest::of(data);
            let _pin = self.content.pin(&digest);
            self.content.put(data).await?;

            let updated = self
                .metadata
                .update_file(
                    file_id,
                    FileUpdate {
                        size: Some(data.len() as u64),
                        content_digest: Some(digest),
                        ..Default::default()
                    },
                )
                .await?;

            if record.content_digest != updated.content_digest {
                self.reclaim(&record.content_digest).await;
            }
            Ok(updated)
        }
        .await;

        self.record(
            caller,
            Some(file_id),
            Some(record.name.clone()),
            AuditAction::Upload,
            outcome_of(&result),
        )
        .await;
        result
    }

    /// The caller's own files.
    pub async fn files(&self, caller: &Caller) -> Result<Vec<FileRecord>> {
        self.metadata.files_by_owner(caller.id).await
    }

    /// Grants where the caller is the grantee.
    pub async fn shared_with_me(&self, caller: &Caller) -> Result<Vec<SharePermission>> {
        self.metadata.permissions_granted_to(caller.id).await
    }

    /// Grants the caller handed out on files they can share.
    pub async fn my_shared_files(&self, caller: &Caller) -> Result<Vec<SharePermission>> {
        self.metadata.permissions_granted_by(caller.id).await
    }

    /// The caller's own audit trail, newest first.
    pub async fn audit_for_user(&self, caller: &Caller) -> Result<Vec<AuditEntry>> {
        self.audit
            .query(&AuditFilter {
                user_id: Some(caller.id),
                ..Default::default()
            })
            .await
    }

    /// A file's audit trail, newest first. Visible to the owner and to
    /// anyone holding a permission on the file.
    pub async fn audit_for_file(&self, caller: &Caller, file_id: Uuid) -> Result<Vec<AuditEntry>> {
        let record = self.metadata.file(file_id).await?;
        if caller.id != record.owner_id
            && self
                .metadata
                .permission_for_file(file_id, caller.id)
                .await?
                .is_none()
        {
            return Err(CoreError::Forbidden(DenyReason::NoAccess));
        }

        self.audit
            .query(&AuditFilter {
                file_id: Some(file_id),
                ..Default::default()
            })
            .await
    }

    async fn authorize(&self, caller_id: Uuid, record: &FileRecord, action: FileAction) -> Result<()> {
        let permission = if caller_id == record.owner_id {
            None
        } else {
            self.metadata
                .permission_for_file(record.id, caller_id)
                .await?
                .map(|p| p.permission_type)
        };

        let decision = access::authorize(caller_id, record.owner_id, permission, action);
        if !decision.is_allowed() {
            tracing::debug!(caller = %caller_id, file = %record.id, %action, "authorization denied");
        }
        decision.into_result()
    }

    /// Blob reclamation never fails the surrounding operation: an orphaned
    /// blob is content-addressed and will be picked up by the next
    /// reclamation attempt for its digest.
    async fn reclaim(&self, digest: &ContentDigest) {
        if let Err(e) = self
            .content
            .delete_if_unreferenced(digest, self.metadata.as_index())
            .await
        {
            tracing::warn!(digest = %digest, error = %e, "blob reclamation failed; blob left in place");
        }
    }

    async fn record(
        &self,
        caller: &Caller,
        file_id: Option<Uuid>,
        file_name: Option<String>,
        action: AuditAction,
        outcome: AuditOutcome,
    ) {
        self.audit
            .record(
                caller.id,
                &caller.name,
                file_id,
                file_name,
                action,
                outcome,
                &caller.source_address,
            )
            .await;
    }
}

fn outcome_of<T>(result: &Result<T>) -> AuditOutcome {
    match result {
        Ok(_) => AuditOutcome::Success,
        Err(e) => outcome_of_err(e),
    }
}

fn outcome_of_err(err: &CoreError) -> AuditOutcome {
    match err {
        CoreError::Forbidden(_) => AuditOutcome::Denied,
        _ => AuditOutcome::Failed,
    }
}
