use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::{MediaFile, MediaType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root: PathBuf,
    pub media_type: MediaType,
    #[serde(default)]
    pub compute_hashes: bool,
}

/// Ordered file list plus the fingerprint that binds any plan built from it
/// to the exact filesystem state observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub scan_id: Uuid,
    pub root: PathBuf,
    pub media_type: MediaType,
    /// `hex(sha256(path '\n' mtime '\n' ...))` over naturally-sorted paths.
    pub fingerprint: String,
    pub scanned_at: DateTime<Utc>,
    pub files: Vec<MediaFile>,
}

/// Wire summary of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub root: PathBuf,
    pub media_type: MediaType,
    pub fingerprint: String,
    pub file_count: usize,
    pub anthology_candidates: usize,
    pub scanned_at: DateTime<Utc>,
}

impl From<&ScanSnapshot> for ScanResult {
    fn from(snapshot: &ScanSnapshot) -> Self {
        ScanResult {
            scan_id: snapshot.scan_id,
            root: snapshot.root.clone(),
            media_type: snapshot.media_type,
            fingerprint: snapshot.fingerprint.clone(),
            file_count: snapshot.files.len(),
            anthology_candidates: snapshot
                .files
                .iter()
                .filter(|f| f.is_anthology_candidate())
                .count(),
            scanned_at: snapshot.scanned_at,
        }
    }
}
