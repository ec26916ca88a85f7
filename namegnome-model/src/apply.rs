use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure handling mode for an apply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Never mutates; produces the report an execution would have.
    DryRun,
    /// First hard failure rolls back every committed rename (default).
    Transactional,
    /// Attempt everything, report successes and failures together.
    ContinueOnError,
}

impl Default for ApplyMode {
    fn default() -> Self {
        ApplyMode::Transactional
    }
}

/// What to do when the destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionStrategy {
    Skip,
    Overwrite,
    Backup,
}

impl Default for CollisionStrategy {
    fn default() -> Self {
        CollisionStrategy::Skip
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOptions {
    #[serde(default)]
    pub mode: ApplyMode,
    #[serde(default)]
    pub collision: CollisionStrategy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            mode: ApplyMode::default(),
            collision: CollisionStrategy::default(),
        }
    }
}

/// Terminal state of one plan item inside an apply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Renamed,
    /// Dry-run verdict: the rename would have been performed.
    WouldRename,
    /// Destination existed and the collision strategy was `skip`.
    SkippedCollision,
    /// Destination equals source; nothing to do.
    Unchanged,
    /// Source no longer matches the plan's fingerprint.
    Stale,
    Failed,
    RolledBack,
    /// Rollback wanted to restore this entry but the inode had moved on.
    RollbackSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: Uuid,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub renamed: usize,
    pub skipped: usize,
    pub stale: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

/// Outcome report for a whole apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub report_id: Uuid,
    pub plan_id: Uuid,
    pub mode: ApplyMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ItemOutcome>,
    pub summary: ApplySummary,
    /// Minted in continue-on-error mode when at least one rename committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_token: Option<String>,
    /// True when a transactional failure reverted the committed subset.
    pub rolled_back: bool,
}

impl ApplyReport {
    pub fn is_partial(&self) -> bool {
        self.summary.failed > 0 || self.summary.stale > 0
    }
}

/// One committed rename, recorded before the next one is attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub status: ItemStatus,
    /// Inode observed at `dst` right after the rename; rollback verifies it.
    pub inode: u64,
    pub mtime: i64,
}

/// Persisted record sufficient to reverse the committed renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackManifest {
    pub report_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub mode: ApplyMode,
    pub entries: Vec<RollbackEntry>,
}
