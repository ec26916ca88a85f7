use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ProviderKind;

/// A persisted disambiguation choice.
///
/// Keyed `(scope, title_norm, year)`; `year = -1` encodes "year unknown".
/// Decisions never expire implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub scope: String,
    pub title_norm: String,
    pub year: i32,
    pub provider: ProviderKind,
    pub ext_id: String,
    pub decided_at: DateTime<Utc>,
}

/// Year sentinel for decision rows when no year hint exists.
pub const YEAR_UNKNOWN: i32 = -1;

/// One choice offered to the user when entity resolution is not unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationCandidate {
    pub provider: ProviderKind,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Pending state behind a `dsk_` token, persisted until resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDisambiguation {
    pub token: String,
    pub scan_id: Uuid,
    /// Which plan field was ambiguous, e.g. `series` or `movie`.
    pub field: String,
    pub scope: String,
    pub title_norm: String,
    pub year: i32,
    pub candidates: Vec<DisambiguationCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once `resolve` picked a candidate; the plan may then resume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_choice: Option<String>,
}
