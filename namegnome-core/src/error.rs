use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use namegnome_model::{PendingDisambiguation, ProviderKind};

/// Error taxonomy of the pipeline. Kinds, not transport details: the server
/// and CLI map each kind onto a status code / exit code.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("disambiguation required for {}", .0.field)]
    DisambiguationRequired(Box<PendingDisambiguation>),

    #[error("provider unavailable (offline={offline}): {message}")]
    ProviderUnavailable {
        provider: Option<ProviderKind>,
        offline: bool,
        message: String,
    },

    #[error("plan is stale: fingerprint mismatch")]
    StalePlan { expected: String, actual: String },

    #[error("root {root} is locked by {owner}")]
    Locked {
        root: PathBuf,
        owner: String,
        acquired_at: DateTime<Utc>,
    },

    #[error("filesystem error at {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Stable machine code carried on every user-visible error.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Io(_) => "io_error",
            CoreError::Sql(_) | CoreError::Migrate(_) => "storage_error",
            CoreError::Serialization(_) => "serialization_error",
            CoreError::Validation(_) => "validation_error",
            CoreError::DisambiguationRequired(_) => "disambiguation_required",
            CoreError::ProviderUnavailable { .. } => "provider_unavailable",
            CoreError::StalePlan { .. } => "stale_plan",
            CoreError::Locked { .. } => "locked",
            CoreError::Filesystem { .. } => "filesystem_error",
            CoreError::SchemaViolation(_) => "schema_violation",
            CoreError::Cancelled => "cancelled",
            CoreError::Fatal(_) => "fatal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        CoreError::Fatal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
