//! Append-only audit log. Entries are immutable facts: there is no update
//! or delete, ordering is total per file via (timestamp, sequence), and the
//! log is never consulted for authorization.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::retry::{with_retry, RetryConfig};
use crate::{AuditAction, AuditEntry, AuditOutcome, CoreError, Result};

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(user_id) = self.user_id {
            if entry.actor_id != user_id {
                return false;
            }
        }
        if let Some(file_id) = self.file_id {
            if entry.file_id != Some(file_id) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Assigns the monotonic sequence number and appends. Returns the
    /// completed entry.
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry>;

    /// Matching entries, descending by (timestamp, sequence).
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
}

struct AuditState {
    entries: VecDeque<AuditEntry>,
    next_sequence: u64,
}

/// In-memory append-only store, optionally journaled to a JSON-lines file
/// so the log survives restarts. The journal is append-only on disk too.
pub struct MemoryAuditStore {
    state: RwLock<AuditState>,
    journal: Option<PathBuf>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AuditState {
                entries: VecDeque::new(),
                next_sequence: 0,
            }),
            journal: None,
        }
    }

    /// Opens a journaled store, replaying any existing journal.
    pub async fn open<P: AsRef<Path>>(journal: P) -> Result<Self> {
        let journal = journal.as_ref().to_owned();
        if let Some(parent) = journal.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut entries = VecDeque::new();
        let mut next_sequence = 0u64;
        if fs::try_exists(&journal).await? {
            let content = fs::read_to_string(&journal).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let entry: AuditEntry = serde_json::from_str(line)
                    .map_err(|e| CoreError::Storage(format!("corrupt audit journal: {e}")))?;
                next_sequence = next_sequence.max(entry.sequence + 1);
                entries.push_back(entry);
            }
        }
        tracing::info!(path = %journal.display(), entries = entries.len(), "audit journal opened");

        Ok(Self {
            state: RwLock::new(AuditState {
                entries,
                next_sequence,
            }),
            journal: Some(journal),
        })
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        let mut state = self.state.write().await;
        entry.sequence = state.next_sequence;
        state.next_sequence += 1;

        if let Some(path) = &self.journal {
            let line = serde_json::to_string(&entry)
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            let mut writer = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        state.entries.push_back(entry.clone());
        Ok(entry)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        let mut matches: Vec<AuditEntry> = state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.sequence.cmp(&a.sequence))
        });
        Ok(matches)
    }
}

/// Front door for recording actions. An append is attempted once inline;
/// on transient failure it is retried with backoff in a background task so
/// the caller's operation is never blocked or rolled back. Exhausted
/// retries are escalated through `tracing::error`; a lost audit write is
/// never silently dropped.
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    retry: RetryConfig,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        actor_id: Uuid,
        actor_name: &str,
        file_id: Option<Uuid>,
        file_name: Option<String>,
        action: AuditAction,
        outcome: AuditOutcome,
        source_address: &str,
    ) -> Option<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            sequence: 0, // assigned by the store
            actor_id,
            actor_name: actor_name.to_string(),
            file_id,
            file_name,
            action,
            outcome,
            timestamp: Utc::now(),
            source_address: source_address.to_string(),
        };

        match self.store.append(entry.clone()).await {
            Ok(appended) => Some(appended),
            Err(err) => {
                tracing::warn!(actor = %actor_id, %action, error = %err, "audit append failed, retrying in background");
                let store = Arc::clone(&self.store);
                let retry = self.retry.clone();
                tokio::spawn(async move {
                    let result = with_retry(&retry, || {
                        let store = Arc::clone(&store);
                        let entry = entry.clone();
                        async move { store.append(entry).await }
                    })
                    .await;
                    if let Err(err) = result {
                        tracing::error!(
                            actor = %actor_id,
                            %action,
                            error = %err,
                            "audit append failed after retries; operational attention required"
                        );
                    }
                });
                None
            }
        }
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.query(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(actor: Uuid, action: AuditAction) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            actor_id: actor,
            actor_name: "alice".to_string(),
            file_id: Some(Uuid::new_v4()),
            file_name: Some("a.txt".to_string()),
            action,
            outcome: AuditOutcome::Success,
            timestamp: Utc::now(),
            source_address: "10.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn sequences_are_monotonic() {
        let store = MemoryAuditStore::new();
        let actor = Uuid::new_v4();
        let a = store.append(entry(actor, AuditAction::Upload)).await.unwrap();
        let b = store.append(entry(actor, AuditAction::Download)).await.unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[tokio::test]
    async fn query_is_descending_and_filtered() {
        let store = MemoryAuditStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.append(entry(alice, AuditAction::Upload)).await.unwrap();
        store.append(entry(bob, AuditAction::Share)).await.unwrap();
        store.append(entry(alice, AuditAction::Download)).await.unwrap();

        let mine = store
            .query(&AuditFilter {
                user_id: Some(alice),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].sequence > mine[1].sequence);
        assert_eq!(mine[0].action, AuditAction::Download);
    }

    #[tokio::test]
    async fn journal_replay_resumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let actor = Uuid::new_v4();
        {
            let store = MemoryAuditStore::open(&path).await.unwrap();
            store.append(entry(actor, AuditAction::Upload)).await.unwrap();
            store.append(entry(actor, AuditAction::Share)).await.unwrap();
        }

        let reopened = MemoryAuditStore::open(&path).await.unwrap();
        let all = reopened.query(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let next = reopened.append(entry(actor, AuditAction::Delete)).await.unwrap();
        assert_eq!(next.sequence, 2);
    }
}
