use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ContentDigest;

/// Metadata record for a stored file. The blob itself lives in the content
/// store under `content_digest`; two records may share a digest without
/// sharing an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub content_digest: ContentDigest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by rename / content-replace. `updated_at` is bumped
/// by the metadata store whenever any field here is set.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub name: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub content_digest: Option<ContentDigest>,
}

/// Sniffs a MIME type from the leading bytes, falling back to the generic
/// binary type when the format is unrecognized.
pub fn detect_content_type(data: &[u8]) -> String {
    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
