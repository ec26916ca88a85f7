//! # NameGnome Core
//!
//! The scan/plan/apply pipeline behind the NameGnome rename service:
//!
//! - **Cache store** — durable SQLite-backed store for provider entities,
//!   episodes, tracks, decisions, response blobs and advisory locks.
//! - **Provider gateway** — uniform façade over TVDB/TMDB/MusicBrainz (plus
//!   fallbacks) with retry, rate limiting and offline mode.
//! - **Deterministic mapper** and **anthology resolver** — provider-first
//!   mapping with interval-algebra refinement; an LLM assists only on
//!   residual grouping ambiguity, schema-validated.
//! - **Plan assembler** — stable, byte-reproducible `PlanReview` artifacts.
//! - **Apply executor** — per-root locks, snapshot verification, atomic
//!   renames with rollback manifests.

pub mod anthology;
pub mod apply;
pub mod cache;
pub mod disambig;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod mapper;
pub mod normalize;
pub mod pipeline;
pub mod plan;
pub mod providers;
pub mod scanner;

pub use error::{CoreError, Result};
pub use mapper::PlanOptions;
pub use pipeline::Pipeline;
