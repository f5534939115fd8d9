use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// Permission ranks form a total order: READ < WRITE < ADMIN. The derive
/// order below is what makes the comparison operators follow that ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionType {
    Read,
    Write,
    Admin,
}

impl PermissionType {
    pub fn rank(&self) -> u8 {
        match self {
            PermissionType::Read => 0,
            PermissionType::Write => 1,
            PermissionType::Admin => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Read => "READ",
            PermissionType::Write => "WRITE",
            PermissionType::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(PermissionType::Read),
            "WRITE" => Ok(PermissionType::Write),
            "ADMIN" => Ok(PermissionType::Admin),
            other => Err(CoreError::InvalidPermission(other.to_string())),
        }
    }
}

/// A grant of access to one file for one grantee. At most one active row
/// exists per (file_id, grantee_id) pair; re-sharing updates it in place.
/// The file's owner holds implicit ADMIN and never appears as a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharePermission {
    pub id: Uuid,
    pub file_id: Uuid,
    pub grantor_id: Uuid,
    pub grantee_id: Uuid,
    pub grantee_email: String,
    pub permission_type: PermissionType,
    pub created_at: DateTime<Utc>,
}
