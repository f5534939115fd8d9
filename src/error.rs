use thiserror::Error;

use crate::access::DenyReason;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Forbidden(DenyReason),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid permission type: {0}")]
    InvalidPermission(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("storage capacity exceeded: {0}")]
    StorageFull(String),
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("blob corrupt: expected digest {expected}, found {actual}")]
    Corrupt { expected: String, actual: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Transient failures the caller may retry with backoff. Denials and
    /// validation errors are terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Unavailable(_) | CoreError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
