#[cfg(test)]
mod tests {
    use ciphershare_core::service::{Caller, FileService};
    use ciphershare_core::{AuditAction, AuditOutcome, PermissionType};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn caller(name: &str) -> Caller {
        Caller::new(Uuid::new_v4(), name, "203.0.113.99")
    }

    /// Everything a restart must preserve: file records, blobs, grants, and
    /// the audit journal with its sequence numbering.
    #[tokio::test]
    async fn state_survives_reopen() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let owner = caller("alice");
        let grantee = caller("bob");
        let file_id;

        {
            let service = FileService::open(temp_dir.path()).await.expect("open failed");
            let file = service
                .upload(&owner, "durable.txt", None, b"durable bytes")
                .await
                .unwrap();
            file_id = file.id;
            service
                .share(&owner, file.id, grantee.id, "bob@example.com", PermissionType::Read)
                .await
                .unwrap();
        }

        let service = FileService::open(temp_dir.path()).await.expect("reopen failed");

        let files = service.files(&owner).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "durable.txt");

        let (bytes, record) = service.download(&grantee, file_id).await.unwrap();
        assert_eq!(bytes, b"durable bytes");
        assert_eq!(record.id, file_id);

        let trail = service.audit_for_file(&owner, file_id).await.unwrap();
        // Upload and share from before the restart, download from after.
        assert_eq!(trail.len(), 3);
        assert!(trail.iter().all(|e| e.outcome == AuditOutcome::Success));
        assert_eq!(trail[0].action, AuditAction::Download);
        assert!(trail.windows(2).all(|w| w[0].sequence > w[1].sequence));
    }

    #[tokio::test]
    async fn deleted_files_stay_deleted_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let owner = caller("alice");
        let file_id;

        {
            let service = FileService::open(temp_dir.path()).await.unwrap();
            let file = service.upload(&owner, "gone.txt", None, b"gone").await.unwrap();
            file_id = file.id;
            service.delete(&owner, file_id).await.unwrap();
        }

        let service = FileService::open(temp_dir.path()).await.unwrap();
        assert!(service.files(&owner).await.unwrap().is_empty());
        assert!(service.download(&owner, file_id).await.is_err());

        // The audit trail outlives the file it describes.
        let trail = service.audit_for_user(&owner).await.unwrap();
        assert!(trail
            .iter()
            .any(|e| e.action == AuditAction::Delete && e.file_id == Some(file_id)));
    }
}
