//! Remote sync status: per-call outcomes and the bounded sync log.
//!
//! Operations never report remote problems to their caller. What happened on
//! the remote path is recorded here instead, and mirrored to `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use blocksync_common::{Error, Result};

/// Number of entries the sync log keeps before dropping the oldest.
pub const MAX_LOG_ENTRIES: usize = 120;

/// Severity of a sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

/// One step of a remote sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: Uuid,
    #[serde(rename = "timestamp")]
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    /// Short step name (e.g., "guard-read", "write").
    pub step: String,
    pub detail: String,
}

/// What the remote branch of an operation ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Document and index entry written.
    Synced { migrated: usize },
    /// Remote sync not configured or no session.
    Unavailable,
    /// A newer remote copy exists; nothing written.
    SkippedNewerRemote { remote_updated_at: i64 },
    /// Some inline attachment could not be decoded or uploaded; nothing written.
    SkippedUploadFailure { failed: usize },
    /// Push deferred to the flush scheduler.
    Scheduled,
    /// A remote call failed.
    Failed(String),
}

impl RemoteOutcome {
    /// Whether the remote copy now reflects the local save.
    pub fn is_synced(&self) -> bool {
        matches!(self, RemoteOutcome::Synced { .. })
    }
}

/// Bounded in-memory log of remote sync activity.
#[derive(Debug, Default)]
pub struct SyncLog {
    entries: Mutex<VecDeque<SyncLogEntry>>,
}

impl SyncLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational step.
    pub fn info(&self, step: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!(step, "{}", detail);
        self.push(LogLevel::Info, step, detail);
    }

    /// Record a step that completed remotely.
    pub fn success(&self, step: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!(step, "{}", detail);
        self.push(LogLevel::Success, step, detail);
    }

    /// Record a failed step.
    pub fn error(&self, step: &str, detail: impl Into<String>) {
        let detail = detail.into();
        error!(step, "{}", detail);
        self.push(LogLevel::Error, step, detail);
    }

    /// Snapshot of the log, oldest first.
    pub fn entries(&self) -> Vec<SyncLogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<SyncLogEntry> {
        self.entries.lock().unwrap().back().cloned()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Serialize a snapshot to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.entries()).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn push(&self, level: LogLevel, step: &str, detail: String) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(SyncLogEntry {
            id: Uuid::new_v4(),
            at: Utc::now(),
            level,
            step: step.to_string(),
            detail,
        });
    }
}
