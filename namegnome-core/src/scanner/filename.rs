use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use namegnome_model::{MediaFile, MediaType, Segment};

use crate::normalize::tokens;

static EPISODE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})[._ -]*E(\d{1,3})(?:[-._ ]*E(\d{1,3}))?").unwrap()
});
static CROSS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})x(\d{2,3})\b").unwrap());
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d])((?:19|20)\d{2})(?:[^\d]|$)").unwrap());
static DIR_TITLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\((\d{4})\)\s*$").unwrap());
static RELEASE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*-\s*\w+$").unwrap());
static TRACK_STEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d{1,2})[-. ])?(\d{1,3})[ ._-]+(.+)$").unwrap());
static DISC_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:cd|disc|disk)\s*(\d{1,2})$").unwrap());

const NOISE_TOKENS: [&str; 22] = [
    "1080p", "720p", "480p", "576p", "2160p", "4k", "uhd", "bluray", "bdrip", "brrip", "webrip",
    "web-dl", "webdl", "hdtv", "dvdrip", "x264", "x265", "h264", "h265", "hevc", "10bit", "hdr",
];

#[derive(Debug, Clone, Copy)]
struct Marker {
    season: u32,
    ep_start: u32,
    ep_end: u32,
    start: usize,
    end: usize,
}

fn blank_file(path: &Path, media_type: MediaType) -> MediaFile {
    MediaFile {
        path: path.to_path_buf(),
        size: 0,
        modified: Utc::now(),
        content_hash: None,
        media_type,
        title: None,
        year: None,
        season: None,
        episodes: Vec::new(),
        artist: None,
        album: None,
        disc: None,
        track: None,
        segments: Vec::new(),
    }
}

fn extract_year(stem: &str) -> Option<i32> {
    YEAR.captures(stem)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .filter(|year| (1900..=2100).contains(year))
}

/// Strip rip-quality noise and a trailing release-group suffix.
fn strip_noise(raw: &str) -> String {
    let spaced = raw.replace(['.', '_'], " ");
    let kept: Vec<&str> = spaced
        .split_whitespace()
        .filter(|word| !NOISE_TOKENS.contains(&word.to_ascii_lowercase().as_str()))
        .collect();
    let joined = kept.join(" ");
    RELEASE_SUFFIX.replace(&joined, "").trim().to_string()
}

fn trim_separators(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | ':'))
}

/// `Show (Year)` directory hint anywhere between the root and the file.
fn dir_hint(root: &Path, path: &Path) -> Option<(String, Option<i32>)> {
    for ancestor in path.ancestors().skip(1) {
        if ancestor == root || !ancestor.starts_with(root) {
            break;
        }
        let Some(name) = ancestor.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(captures) = DIR_TITLE_YEAR.captures(name) {
            let title = captures.get(1)?.as_str().trim().to_string();
            let year = captures.get(2)?.as_str().parse::<i32>().ok();
            return Some((title, year));
        }
    }
    None
}

fn find_markers(stem: &str) -> Vec<Marker> {
    let mut markers: Vec<Marker> = EPISODE_MARKER
        .captures_iter(stem)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let season = captures.get(1)?.as_str().parse().ok()?;
            let ep_start: u32 = captures.get(2)?.as_str().parse().ok()?;
            let ep_end = captures
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(ep_start);
            Some(Marker {
                season,
                ep_start,
                ep_end: ep_end.max(ep_start),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect();

    if markers.is_empty() {
        markers = CROSS_MARKER
            .captures_iter(stem)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                let season = captures.get(1)?.as_str().parse().ok()?;
                let episode: u32 = captures.get(2)?.as_str().parse().ok()?;
                Some(Marker {
                    season,
                    ep_start: episode,
                    ep_end: episode,
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect();
    }
    markers
}

fn clean_show_name(raw: &str, year: Option<i32>) -> String {
    let mut name = trim_separators(&strip_noise(raw)).to_string();
    if let Some(year) = year {
        name = name.replace(&format!("({year})"), " ");
        name = name
            .split_whitespace()
            .filter(|word| *word != year.to_string())
            .collect::<Vec<_>>()
            .join(" ");
    }
    trim_separators(&name).to_string()
}

/// Episode filename parsing: SxxEyy (optionally ranged, optionally repeated)
/// markers split the stem into segments, each carrying its title span.
pub fn parse_tv(root: &Path, path: &Path) -> Option<MediaFile> {
    let stem = path.file_stem()?.to_str()?;
    let markers = find_markers(stem);
    if markers.is_empty() {
        return None;
    }

    let mut file = blank_file(path, MediaType::Tv);

    let prefix = &stem[..markers[0].start];
    let filename_year = extract_year(prefix).or_else(|| extract_year(stem));
    if let Some((title, year)) = dir_hint(root, path) {
        file.title = Some(title);
        file.year = year.or(filename_year);
    } else {
        let cleaned = clean_show_name(prefix, filename_year);
        file.title = (!cleaned.is_empty()).then_some(cleaned);
        file.year = filename_year;
    }

    file.season = Some(markers[0].season);

    let mut episodes: Vec<u32> = Vec::new();
    for (index, marker) in markers.iter().enumerate() {
        let span_start = marker.end;
        let span_end = markers.get(index + 1).map_or(stem.len(), |next| next.start);
        let span = trim_separators(&stem[span_start..span_end]);
        let title_tokens = tokens(&strip_noise(span));

        file.segments.push(Segment {
            start: marker.ep_start,
            end: marker.ep_end,
            title_tokens,
            offset: span_start,
            len: span_end - span_start,
        });
        episodes.extend(marker.ep_start..=marker.ep_end);
    }
    episodes.sort_unstable();
    episodes.dedup();
    file.episodes = episodes;

    Some(file)
}

/// Movie parsing: prefer a `Title (Year)` parent directory, then fall back
/// to cleaning the filename itself.
pub fn parse_movie(root: &Path, path: &Path) -> Option<MediaFile> {
    let stem = path.file_stem()?.to_str()?;
    let mut file = blank_file(path, MediaType::Movie);

    if let Some((title, year)) = dir_hint(root, path) {
        file.title = Some(title);
        file.year = year;
        return Some(file);
    }

    let year = extract_year(stem);
    let mut cleaned = strip_noise(stem);
    if let Some(year) = year {
        cleaned = cleaned
            .split_whitespace()
            .filter(|word| *word != year.to_string() && *word != format!("({year})"))
            .collect::<Vec<_>>()
            .join(" ");
    }
    // Everything in brackets is rip metadata.
    while let (Some(open), Some(close)) = (cleaned.find(['(', '[']), cleaned.find([')', ']'])) {
        if close <= open {
            break;
        }
        cleaned.replace_range(open..=close, " ");
    }
    let title = trim_separators(&cleaned.split_whitespace().collect::<Vec<_>>().join(" ")).to_string();
    if title.is_empty() {
        return None;
    }
    file.title = Some(title);
    file.year = year;
    Some(file)
}

/// Music parsing from the `Artist/Album (Year)/NN - Title.ext` layout.
pub fn parse_music(root: &Path, path: &Path) -> Option<MediaFile> {
    let stem = path.file_stem()?.to_str()?;
    let captures = TRACK_STEM.captures(stem)?;
    let disc_from_stem: Option<u32> = captures.get(1).and_then(|m| m.as_str().parse().ok());
    let track: u32 = captures.get(2)?.as_str().parse().ok()?;
    let track_title = trim_separators(captures.get(3)?.as_str()).to_string();

    let mut file = blank_file(path, MediaType::Music);
    file.track = Some(track);
    file.title = (!track_title.is_empty()).then_some(track_title);

    // Walk up: optional disc dir, then album, then artist.
    let mut ancestors = path
        .ancestors()
        .skip(1)
        .take_while(|a| *a != root && a.starts_with(root))
        .filter_map(|a| a.file_name().and_then(|n| n.to_str()));

    let mut album_dir = ancestors.next();
    if let Some(dir) = album_dir {
        if let Some(captures) = DISC_DIR.captures(dir) {
            file.disc = captures.get(1).and_then(|m| m.as_str().parse().ok());
            album_dir = ancestors.next();
        }
    }
    if let Some(dir) = album_dir {
        if let Some(captures) = DIR_TITLE_YEAR.captures(dir) {
            file.album = Some(captures.get(1)?.as_str().trim().to_string());
            file.year = captures.get(2)?.as_str().parse().ok();
        } else {
            file.album = Some(dir.to_string());
        }
    }
    file.artist = ancestors.next().map(|dir| dir.to_string());
    if file.disc.is_none() {
        file.disc = disc_from_stem;
    }

    Some(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_episode_with_directory_hint() {
        let root = PathBuf::from("/media/tv");
        let path =
            root.join("Danger Mouse (2015)/Season 01/Danger Mouse 2015-S01E01-Danger Mouse Begins Again.mp4");
        let file = parse_tv(&root, &path).unwrap();
        assert_eq!(file.title.as_deref(), Some("Danger Mouse"));
        assert_eq!(file.year, Some(2015));
        assert_eq!(file.season, Some(1));
        assert_eq!(file.episodes, vec![1]);
        assert_eq!(file.segments.len(), 1);
        assert_eq!(
            file.segments[0].title_tokens,
            vec!["danger", "mouse", "begins", "again"]
        );
    }

    #[test]
    fn parses_episode_from_filename_only() {
        let root = PathBuf::from("/media/tv");
        let path = root.join("Breaking.Bad.S01E01.Pilot.1080p.BluRay.mkv");
        let file = parse_tv(&root, &path).unwrap();
        assert_eq!(file.title.as_deref(), Some("Breaking Bad"));
        assert_eq!(file.season, Some(1));
        assert_eq!(file.episodes, vec![1]);
        // Noise tokens are stripped from the title span; the release-group
        // style suffix is gone too.
        assert_eq!(file.segments[0].title_tokens, vec!["pilot"]);
    }

    #[test]
    fn parses_declared_episode_range() {
        let root = PathBuf::from("/media/tv");
        let path = root.join("Firebuds-S01E01-E02-Car In A Tree Dalmatian Day.mp4");
        let file = parse_tv(&root, &path).unwrap();
        assert_eq!(file.episodes, vec![1, 2]);
        assert_eq!(file.segments.len(), 1);
        assert_eq!(file.segments[0].start, 1);
        assert_eq!(file.segments[0].end, 2);
    }

    #[test]
    fn splits_repeated_markers_into_segments() {
        let root = PathBuf::from("/media/tv");
        let path = root.join("Show-S01E01-First Part-S01E02-Second Part.mkv");
        let file = parse_tv(&root, &path).unwrap();
        assert_eq!(file.segments.len(), 2);
        assert_eq!(file.segments[0].title_tokens, vec!["first", "part"]);
        assert_eq!(file.segments[1].title_tokens, vec!["second", "part"]);
        assert_eq!(file.episodes, vec![1, 2]);
    }

    #[test]
    fn parses_movie_from_folder_then_filename() {
        let root = PathBuf::from("/media/movies");
        let foldered = root.join("The Dark Knight (2008)/The.Dark.Knight.2008.1080p.mkv");
        let file = parse_movie(&root, &foldered).unwrap();
        assert_eq!(file.title.as_deref(), Some("The Dark Knight"));
        assert_eq!(file.year, Some(2008));

        let bare = root.join("The.Dark.Knight.2008.1080p.BluRay.x264.mkv");
        let file = parse_movie(&root, &bare).unwrap();
        assert_eq!(file.title.as_deref(), Some("The Dark Knight"));
        assert_eq!(file.year, Some(2008));
    }

    #[test]
    fn parses_music_layout() {
        let root = PathBuf::from("/media/music");
        let path = root.join("Daft Punk/Discovery (2001)/03 - Digital Love.flac");
        let file = parse_music(&root, &path).unwrap();
        assert_eq!(file.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(file.album.as_deref(), Some("Discovery"));
        assert_eq!(file.year, Some(2001));
        assert_eq!(file.track, Some(3));
        assert_eq!(file.title.as_deref(), Some("Digital Love"));
    }

    #[test]
    fn parses_music_disc_directory() {
        let root = PathBuf::from("/media/music");
        let path = root.join("Artist/Album (1999)/CD 2/07 - Song.mp3");
        let file = parse_music(&root, &path).unwrap();
        assert_eq!(file.disc, Some(2));
        assert_eq!(file.album.as_deref(), Some("Album"));
        assert_eq!(file.artist.as_deref(), Some("Artist"));
    }
}
