//! Pure access-control decisions. No store handles and no side effects: the
//! caller looks up the file's owner and the caller's permission row (if any)
//! and this module answers Allow or Deny. The file service consults it
//! before every content or metadata mutation and never bypasses it.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::{PermissionType, Result};

/// Actions a caller can attempt against a file. `Revoke` carries the rank of
/// the grant being revoked, since revoke authority depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Download,
    Replace,
    Delete,
    Share,
    Revoke { target: PermissionType },
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAction::Download => f.write_str("download"),
            FileAction::Replace => f.write_str("replace content"),
            FileAction::Delete => f.write_str("delete"),
            FileAction::Share => f.write_str("share"),
            FileAction::Revoke { .. } => f.write_str("revoke"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("no permission on this file")]
    NoAccess,
    #[error("{held} permission does not allow {action}")]
    InsufficientPermission { held: PermissionType, action: String },
    #[error("only the file owner may perform this action")]
    OwnerOnly,
    #[error("ADMIN may only revoke grants of strictly lower rank")]
    CannotRevokeEqualRank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Converts a denial into the `Forbidden` error the service propagates.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(crate::CoreError::Forbidden(reason)),
        }
    }
}

/// Decides whether `caller` may perform `action` on a file owned by `owner`,
/// given the caller's active permission on that file (`None` when no row
/// exists). Total and deterministic: the same inputs always yield the same
/// decision.
///
/// Rules, in order:
/// 1. The owner may do everything (implicit ADMIN, never stored as a row).
/// 2. READ allows download only; WRITE adds content replace; ADMIN adds
///    share and revoke. Delete stays owner-only at every rank.
/// 3. Revoke by an ADMIN grantee requires the target grant to rank strictly
///    below ADMIN, so one ADMIN cannot strip another.
pub fn authorize(
    caller: Uuid,
    owner: Uuid,
    permission: Option<PermissionType>,
    action: FileAction,
) -> Decision {
    if caller == owner {
        return Decision::Allow;
    }

    let held = match permission {
        Some(held) => held,
        None => return Decision::Deny(DenyReason::NoAccess),
    };

    let insufficient = || {
        Decision::Deny(DenyReason::InsufficientPermission {
            held,
            action: action.to_string(),
        })
    };

    match action {
        FileAction::Download => Decision::Allow,
        FileAction::Replace => {
            if held >= PermissionType::Write {
                Decision::Allow
            } else {
                insufficient()
            }
        }
        FileAction::Delete => Decision::Deny(DenyReason::OwnerOnly),
        FileAction::Share => {
            if held == PermissionType::Admin {
                Decision::Allow
            } else {
                insufficient()
            }
        }
        FileAction::Revoke { target } => {
            if held != PermissionType::Admin {
                insufficient()
            } else if target < PermissionType::Admin {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::CannotRevokeEqualRank)
            }
        }
    }
}
