//! Shared domain types for the NameGnome rename pipeline.
//!
//! Everything in this crate is a plain value: inputs produced by the
//! scanner, canonical records fetched from metadata providers, and the
//! `PlanReview` / rollback artifacts the pipeline emits. No I/O lives here.

pub mod apply;
pub mod decision;
pub mod entities;
pub mod events;
pub mod media;
pub mod plan;
pub mod scan;

pub use apply::{
    ApplyMode, ApplyOptions, ApplyReport, ApplySummary, CollisionStrategy, ItemOutcome,
    ItemStatus, RollbackEntry, RollbackManifest,
};
pub use decision::{Decision, DisambiguationCandidate, PendingDisambiguation, YEAR_UNKNOWN};
pub use entities::{
    Children, EntityKind, EpisodeRecord, ProviderEntity, ProviderKind, ProviderRef,
    SearchCandidate, TrackRecord,
};
pub use events::{JobEvent, JobKind, JobState, JobStatus};
pub use media::{MediaFile, MediaType, Segment};
pub use plan::{
    ConfidenceBucket, EpisodeSpan, MovieTarget, PLAN_SCHEMA_VERSION, PlanAlternative,
    PlanDestination, PlanGroup, PlanItem, PlanOrigin, PlanReview, PlanRollup, PlanSource,
    PlanSummary, SourceAttribution, TrackTarget, WarningCode,
};
pub use scan::{ScanRequest, ScanResult, ScanSnapshot};
