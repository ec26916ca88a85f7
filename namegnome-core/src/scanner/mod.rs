//! Root walking and filename parsing.
//!
//! Produces [`ScanSnapshot`]s: ordered `MediaFile` lists plus a fingerprint
//! over `(path, mtime)` pairs that binds any plan built from the snapshot to
//! the exact filesystem state observed.

mod filename;

pub use filename::{parse_movie, parse_music, parse_tv};

use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use namegnome_model::{MediaFile, MediaType, ScanSnapshot};

use crate::error::{CoreError, Result};

const VIDEO_EXTENSIONS: [&str; 11] = [
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts",
];
const AUDIO_EXTENSIONS: [&str; 8] = ["mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "wma"];

/// Namespace for deterministic scan/plan ids.
pub(crate) const ID_NAMESPACE: Uuid = Uuid::from_u128(0x6e67_5f6e_616d_6567_6e6f_6d65_5f69_6421);

fn wanted_extension(media_type: MediaType, path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    match media_type {
        MediaType::Tv | MediaType::Movie => VIDEO_EXTENSIONS.contains(&ext.as_str()),
        MediaType::Music => AUDIO_EXTENSIONS.contains(&ext.as_str()),
    }
}

/// Walk `root` and parse every media file of the declared type.
pub fn scan_root(root: &Path, media_type: MediaType) -> Result<ScanSnapshot> {
    if !root.is_dir() {
        return Err(CoreError::Validation(format!(
            "scan root is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !wanted_extension(media_type, path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(error = %err, "skipping file without metadata");
                continue;
            }
        };
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let parsed = match media_type {
            MediaType::Tv => parse_tv(root, path),
            MediaType::Movie => parse_movie(root, path),
            MediaType::Music => parse_music(root, path),
        };
        let Some(mut file) = parsed else {
            debug!(path = %crate::logging::redacted(path), "unparseable filename, skipped");
            continue;
        };
        file.size = metadata.len();
        file.modified = modified;
        files.push(file);
    }

    files.sort_by(|a, b| {
        crate::normalize::natural_cmp(&a.path.to_string_lossy(), &b.path.to_string_lossy())
    });

    let fingerprint = fingerprint_files(files.iter().map(|f| (f.path.as_path(), f.modified)));
    let scan_id = Uuid::new_v5(&ID_NAMESPACE, fingerprint.as_bytes());

    Ok(ScanSnapshot {
        scan_id,
        root: root.to_path_buf(),
        media_type,
        fingerprint,
        scanned_at: Utc::now(),
        files,
    })
}

/// `hex(sha256(path '\n' mtime '\n' ...))` over the given (ordered) files.
pub fn fingerprint_files<'a, I>(files: I) -> String
where
    I: Iterator<Item = (&'a Path, DateTime<Utc>)>,
{
    let mut hasher = Sha256::new();
    for (path, modified) in files {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(modified.timestamp().to_string().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
