use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{EntityKind, ProviderKind};
use crate::media::MediaType;

/// Current `PlanReview` schema version.
pub const PLAN_SCHEMA_VERSION: &str = "1.0";

/// Which pass produced a plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    Deterministic,
    Llm,
}

impl PlanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanOrigin::Deterministic => "deterministic",
            PlanOrigin::Llm => "llm",
        }
    }
}

/// Derived from confidence; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

impl ConfidenceBucket {
    /// `>= 0.90` high, `>= 0.70` medium, else low.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.90 {
            ConfidenceBucket::High
        } else if confidence >= 0.70 {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBucket::High => "high",
            ConfidenceBucket::Medium => "medium",
            ConfidenceBucket::Low => "low",
        }
    }
}

/// Stable warning codes attached to plan items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    OverlapUnresolved,
    GapPresent,
    TitleLowMatch,
    PrefixMonikerStripped,
    LowTokenOverlap,
    LlmUnavailable,
    TieBreakerDeterministicPreferred,
    NeedsReview,
    EpisodeNotFound,
    TrackNotFound,
    YearMissing,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::OverlapUnresolved => "overlap_unresolved",
            WarningCode::GapPresent => "gap_present",
            WarningCode::TitleLowMatch => "title_low_match",
            WarningCode::PrefixMonikerStripped => "prefix_moniker_stripped",
            WarningCode::LowTokenOverlap => "low_token_overlap",
            WarningCode::LlmUnavailable => "llm_unavailable",
            WarningCode::TieBreakerDeterministicPreferred => {
                "tie_breaker_deterministic_preferred"
            }
            WarningCode::NeedsReview => "needs_review",
            WarningCode::EpisodeNotFound => "episode_not_found",
            WarningCode::TrackNotFound => "track_not_found",
            WarningCode::YearMissing => "year_missing",
        }
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item came from: one source file, optionally a single segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSource {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<u32>,
}

/// Canonical episode span an item maps to. Episode numbers are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSpan {
    pub season: u32,
    pub episodes: Vec<u32>,
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieTarget {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTarget {
    pub artist: String,
    pub album: String,
    pub disc: u32,
    pub track: u32,
    pub title: String,
}

/// Rename destination plus the canonical content it encodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDestination {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie: Option<MovieTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackTarget>,
}

/// Which provider records back an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub provider: ProviderKind,
    pub id: String,
    pub kind: EntityKind,
}

/// A losing candidate kept for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAlternative {
    pub origin: PlanOrigin,
    pub confidence: f64,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<u32>,
}

/// One proposed rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: Uuid,
    pub origin: PlanOrigin,
    pub confidence: f64,
    pub bucket: ConfidenceBucket,
    pub src: PlanSource,
    pub dst: PlanDestination,
    pub sources: Vec<SourceAttribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningCode>,
    pub anthology: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<PlanAlternative>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<String>,
}

/// Per-source-file aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRollup {
    pub count: usize,
    pub min_confidence: f64,
    pub max_confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningCode>,
}

/// Items clustered by source file. Groups reference item ids; items do not
/// back-reference groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub source_path: PathBuf,
    pub item_ids: Vec<Uuid>,
    pub rollup: PlanRollup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_items: usize,
    pub by_origin: BTreeMap<String, usize>,
    pub by_bucket: BTreeMap<String, usize>,
    pub warnings: BTreeMap<String, usize>,
    pub anthology_candidates: usize,
    pub disambiguations_required: usize,
}

/// The authoritative plan artifact. A value: re-planning produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReview {
    pub plan_id: Uuid,
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub scan_id: Uuid,
    pub source_fingerprint: String,
    pub media_type: MediaType,
    pub summary: PlanSummary,
    pub groups: Vec<PlanGroup>,
    pub items: Vec<PlanItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}
