mod audit;
mod digest;
mod file;
mod permission;

pub use audit::{AuditAction, AuditEntry, AuditOutcome};
pub use digest::ContentDigest;
pub use file::{detect_content_type, FileRecord, FileUpdate};
pub use permission::{PermissionType, SharePermission};
