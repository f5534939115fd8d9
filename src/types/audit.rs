use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Upload,
    Download,
    Delete,
    Share,
    Revoke,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Upload => "UPLOAD",
            AuditAction::Download => "DOWNLOAD",
            AuditAction::Delete => "DELETE",
            AuditAction::Share => "SHARE",
            AuditAction::Revoke => "REVOKE",
        };
        f.write_str(s)
    }
}

/// Whether the recorded attempt went through. Denied and failed attempts are
/// logged too; an entry with a non-Success outcome does not mean the action
/// happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

/// One immutable fact in the audit log. `file_name` is a snapshot taken at
/// the time of the action, since the file may later be renamed or deleted;
/// `file_id` and `file_name` are absent when the attempt never resolved a
/// target (e.g. a failed upload). `sequence` is assigned monotonically by
/// the audit store and breaks timestamp ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub actor_id: Uuid,
    pub actor_name: String,
    pub file_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    pub source_address: String,
}
