use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which pipeline phase a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scan,
    Plan,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// Streamed job event. Events are hints; the buffered final JSON reply is
/// the authoritative artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        stage: String,
        completed: u64,
        total: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    LlmToken {
        text: String,
    },
    Warning {
        code: String,
        message: String,
    },
    Done {
        state: JobState,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True once the buffered final reply is available.
    pub has_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
