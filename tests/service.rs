#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use ciphershare_core::audit::{AuditFilter, AuditLogger, AuditStore, MemoryAuditStore};
    use ciphershare_core::metadata::MemoryMetadataStore;
    use ciphershare_core::service::{Caller, FileService};
    use ciphershare_core::storage::memory::MemoryContentStore;
    use ciphershare_core::storage::retry::RetryConfig;
    use ciphershare_core::storage::ContentBackend;
    use ciphershare_core::{
        AuditAction, AuditEntry, AuditOutcome, ContentDigest, CoreError, PermissionType, Result,
    };
    use tokio::sync::Mutex;
    use tokio::time::Duration;
    use uuid::Uuid;

    struct Harness {
        service: FileService,
        content: Arc<MemoryContentStore>,
        audit: Arc<MemoryAuditStore>,
    }

    fn harness() -> Harness {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let content = Arc::new(MemoryContentStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let audit = Arc::new(MemoryAuditStore::new());
        let service = FileService::new(
            content.clone(),
            metadata,
            AuditLogger::new(audit.clone()),
        );
        Harness {
            service,
            content,
            audit,
        }
    }

    fn caller(name: &str) -> Caller {
        Caller::new(Uuid::new_v4(), name, "203.0.113.7")
    }

    async fn successful_entries(
        audit: &MemoryAuditStore,
        file_id: Uuid,
        action: AuditAction,
    ) -> usize {
        audit
            .query(&AuditFilter {
                file_id: Some(file_id),
                action: Some(action),
                ..Default::default()
            })
            .await
            .unwrap()
            .iter()
            .filter(|e| e.outcome == AuditOutcome::Success)
            .count()
    }

    /// The full lifecycle: upload, share READ, grantee downloads, grantee
    /// cannot delete, owner deletes and the blob goes with the file.
    #[tokio::test]
    async fn report_pdf_lifecycle() {
        let h = harness();
        let owner = caller("alice");
        let reader = caller("bob");

        let file = h
            .service
            .upload(&owner, "report.pdf", Some("application/pdf"), b"0123456789")
            .await
            .expect("upload failed");
        assert_eq!(file.size, 10);
        assert_eq!(file.content_digest, ContentDigest::of(b"0123456789"));
        assert_eq!(successful_entries(&h.audit, file.id, AuditAction::Upload).await, 1);

        let grant = h
            .service
            .share(&owner, file.id, reader.id, "bob@example.com", PermissionType::Read)
            .await
            .expect("share failed");
        assert_eq!(grant.permission_type, PermissionType::Read);
        assert_eq!(successful_entries(&h.audit, file.id, AuditAction::Share).await, 1);

        let (bytes, record) = h.service.download(&reader, file.id).await.expect("download failed");
        assert_eq!(bytes, b"0123456789");
        assert_eq!(record.id, file.id);
        assert_eq!(successful_entries(&h.audit, file.id, AuditAction::Download).await, 1);

        // READ cannot delete: denied, no successful DELETE entry, no change.
        let denied = h.service.delete(&reader, file.id).await;
        assert!(matches!(denied, Err(CoreError::Forbidden(_))));
        assert_eq!(successful_entries(&h.audit, file.id, AuditAction::Delete).await, 0);
        assert!(h.service.download(&reader, file.id).await.is_ok());

        h.service.delete(&owner, file.id).await.expect("owner delete failed");
        assert_eq!(successful_entries(&h.audit, file.id, AuditAction::Delete).await, 1);
        assert!(!h.content.contains(&file.content_digest).await.unwrap());
        assert!(h.service.shared_with_me(&reader).await.unwrap().is_empty());
        assert!(matches!(
            h.service.download(&owner, file.id).await,
            Err(CoreError::NotFound(_))
        ));
    }

    /// ADMIN grantees can extend sharing but cannot act against the owner
    /// or against peer ADMINs.
    #[tokio::test]
    async fn admin_delegation_and_revoke_limits() {
        let h = harness();
        let owner = caller("alice");
        let admin = caller("ursula");
        let writer = caller("victor");
        let peer_admin = caller("wanda");

        let file = h
            .service
            .upload(&owner, "plan.txt", None, b"the plan")
            .await
            .unwrap();

        let admin_grant = h
            .service
            .share(&owner, file.id, admin.id, "ursula@example.com", PermissionType::Admin)
            .await
            .unwrap();
        let peer_grant = h
            .service
            .share(&owner, file.id, peer_admin.id, "wanda@example.com", PermissionType::Admin)
            .await
            .unwrap();

        // ADMIN may share onward.
        let write_grant = h
            .service
            .share(&admin, file.id, writer.id, "victor@example.com", PermissionType::Write)
            .await
            .expect("admin should be able to share");

        // The owner has no permission row, so there is nothing to revoke;
        // the owner's access is implicit and untouchable.
        assert!(h
            .service
            .my_shared_files(&owner)
            .await
            .unwrap()
            .iter()
            .all(|p| p.grantee_id != owner.id));

        // ADMIN cannot revoke a peer ADMIN's grant.
        assert!(matches!(
            h.service.revoke(&admin, peer_grant.id).await,
            Err(CoreError::Forbidden(_))
        ));

        // ADMIN may revoke strictly lower ranks.
        h.service
            .revoke(&admin, write_grant.id)
            .await
            .expect("admin should revoke WRITE");
        assert!(h.service.shared_with_me(&writer).await.unwrap().is_empty());

        // The owner may revoke anything, ADMIN included.
        h.service.revoke(&owner, admin_grant.id).await.unwrap();
        assert!(matches!(
            h.service.download(&admin, file.id).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn write_grant_allows_replace_but_read_does_not() {
        let h = harness();
        let owner = caller("alice");
        let writer = caller("bob");
        let reader = caller("carol");

        let file = h.service.upload(&owner, "notes.txt", None, b"v1").await.unwrap();
        h.service
            .share(&owner, file.id, writer.id, "bob@example.com", PermissionType::Write)
            .await
            .unwrap();
        h.service
            .share(&owner, file.id, reader.id, "carol@example.com", PermissionType::Read)
            .await
            .unwrap();

        let updated = h.service.replace(&writer, file.id, b"v2 content").await.unwrap();
        assert_eq!(updated.content_digest, ContentDigest::of(b"v2 content"));
        assert_eq!(updated.size, b"v2 content".len() as u64);
        assert!(updated.updated_at >= file.updated_at);

        // The old blob had no other referencers and is reclaimed.
        assert!(!h.content.contains(&file.content_digest).await.unwrap());

        assert!(matches!(
            h.service.replace(&reader, file.id, b"v3").await,
            Err(CoreError::Forbidden(_))
        ));
        let (bytes, _) = h.service.download(&reader, file.id).await.unwrap();
        assert_eq!(bytes, b"v2 content");
    }

    #[tokio::test]
    async fn strangers_are_denied_and_denials_are_audited() {
        let h = harness();
        let owner = caller("alice");
        let stranger = caller("mallory");

        let file = h.service.upload(&owner, "secret.txt", None, b"secret").await.unwrap();

        assert!(matches!(
            h.service.download(&stranger, file.id).await,
            Err(CoreError::Forbidden(_))
        ));

        let denied: Vec<_> = h
            .audit
            .query(&AuditFilter {
                file_id: Some(file.id),
                action: Some(AuditAction::Download),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].outcome, AuditOutcome::Denied);
        assert_eq!(denied[0].actor_id, stranger.id);
    }

    #[tokio::test]
    async fn every_successful_operation_logs_exactly_once_in_order() {
        let h = harness();
        let owner = caller("alice");
        let grantee = caller("bob");

        let file = h.service.upload(&owner, "audit-me.txt", None, b"bytes").await.unwrap();
        let grant = h
            .service
            .share(&owner, file.id, grantee.id, "bob@example.com", PermissionType::Read)
            .await
            .unwrap();
        h.service.download(&grantee, file.id).await.unwrap();
        h.service.revoke(&owner, grant.id).await.unwrap();
        h.service.delete(&owner, file.id).await.unwrap();

        let trail = h
            .audit
            .query(&AuditFilter {
                file_id: Some(file.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(trail.len(), 5);
        assert!(trail.iter().all(|e| e.outcome == AuditOutcome::Success));

        // Newest first, strictly ordered by sequence.
        assert!(trail.windows(2).all(|w| w[0].sequence > w[1].sequence));
        let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Delete,
                AuditAction::Revoke,
                AuditAction::Download,
                AuditAction::Share,
                AuditAction::Upload,
            ]
        );

        // The name snapshot outlives the deleted file.
        assert!(trail.iter().all(|e| e.file_name.as_deref() == Some("audit-me.txt")));
    }

    #[tokio::test]
    async fn audit_views_are_scoped() {
        let h = harness();
        let owner = caller("alice");
        let grantee = caller("bob");
        let stranger = caller("mallory");

        let file = h.service.upload(&owner, "scoped.txt", None, b"scoped").await.unwrap();
        h.service
            .share(&owner, file.id, grantee.id, "bob@example.com", PermissionType::Read)
            .await
            .unwrap();

        assert!(h.service.audit_for_file(&owner, file.id).await.is_ok());
        assert!(h.service.audit_for_file(&grantee, file.id).await.is_ok());
        assert!(matches!(
            h.service.audit_for_file(&stranger, file.id).await,
            Err(CoreError::Forbidden(_))
        ));

        let own_trail = h.service.audit_for_user(&owner).await.unwrap();
        assert!(own_trail.iter().all(|e| e.actor_id == owner.id));
    }

    #[tokio::test]
    async fn upload_rejects_empty_name_and_sniffs_content_type() {
        let h = harness();
        let owner = caller("alice");

        assert!(matches!(
            h.service.upload(&owner, "   ", None, b"data").await,
            Err(CoreError::InvalidAction(_))
        ));

        let png_magic = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
        let file = h.service.upload(&owner, "pic.png", None, &png_magic).await.unwrap();
        assert_eq!(file.content_type, "image/png");
    }

    #[tokio::test]
    async fn sharing_with_the_owner_is_rejected() {
        let h = harness();
        let owner = caller("alice");
        let file = h.service.upload(&owner, "self.txt", None, b"self").await.unwrap();

        assert!(matches!(
            h.service
                .share(&owner, file.id, owner.id, "alice@example.com", PermissionType::Read)
                .await,
            Err(CoreError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn quota_surfaces_storage_full() {
        let content = Arc::new(MemoryContentStore::new().with_capacity(8));
        let service = FileService::new(
            content,
            Arc::new(MemoryMetadataStore::new()),
            AuditLogger::new(Arc::new(MemoryAuditStore::new())),
        );
        let owner = caller("alice");

        service.upload(&owner, "fits.txt", None, b"12345678").await.unwrap();
        assert!(matches!(
            service.upload(&owner, "overflow.txt", None, b"x").await,
            Err(CoreError::StorageFull(_))
        ));
    }

    /// Audit backend that rejects the first N appends, then recovers.
    struct FlakyAuditStore {
        inner: MemoryAuditStore,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl AuditStore for FlakyAuditStore {
        async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
            {
                let mut left = self.failures_left.lock().await;
                if *left > 0 {
                    *left -= 1;
                    return Err(CoreError::Unavailable("audit backend offline".to_string()));
                }
            }
            self.inner.append(entry).await
        }

        async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
            self.inner.query(filter).await
        }
    }

    /// An audit backend outage never fails or blocks the caller's
    /// operation; the append is retried in the background and the entry
    /// lands once the backend recovers.
    #[tokio::test]
    async fn audit_outage_does_not_fail_the_operation() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let flaky = Arc::new(FlakyAuditStore {
            inner: MemoryAuditStore::new(),
            failures_left: Mutex::new(2),
        });
        let service = FileService::new(
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryMetadataStore::new()),
            AuditLogger::new(flaky.clone())
                .with_retry_config(RetryConfig::new(3, Duration::from_millis(10))),
        );
        let owner = caller("alice");

        // The inline append fails, yet the upload commits.
        let file = service
            .upload(&owner, "resilient.txt", None, b"still stored")
            .await
            .expect("upload must not fail on an audit outage");
        assert_eq!(service.files(&owner).await.unwrap().len(), 1);

        let mut entries = Vec::new();
        for _ in 0..50 {
            entries = flaky
                .inner
                .query(&AuditFilter {
                    file_id: Some(file.id),
                    action: Some(AuditAction::Upload),
                    ..Default::default()
                })
                .await
                .unwrap();
            if !entries.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
    }
}
