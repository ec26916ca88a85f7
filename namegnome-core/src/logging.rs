//! Log redaction helpers.
//!
//! User-visible log lines carry only the file name of any absolute path
//! unless `NAMEGNOME_DEBUG=1` is set.

use std::path::Path;

fn debug_enabled() -> bool {
    std::env::var("NAMEGNOME_DEBUG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Path rendering for log output: full path only in debug mode.
pub fn redacted(path: &Path) -> String {
    if debug_enabled() {
        return path.display().to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "<path>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_to_file_name_by_default() {
        // Test processes do not set NAMEGNOME_DEBUG.
        if debug_enabled() {
            return;
        }
        assert_eq!(redacted(Path::new("/media/tv/secret/E01.mkv")), "E01.mkv");
        assert_eq!(redacted(Path::new("/")), "<path>");
    }
}
