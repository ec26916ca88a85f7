//! Target path grammar.
//!
//! Builds the destination layout media servers expect:
//! TV `Show (Year)/Season SS/Show - SSSEee[-Eee] - Title[ & Title].ext`,
//! movie `Title (Year)/Title (Year).ext`,
//! music `Artist/Album (Year)/TrackNN - Title.ext`.
//! Components are NFC-normalized and carry no reserved filesystem characters.

use std::path::PathBuf;

use unicode_normalization::UnicodeNormalization;

const RESERVED: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// NFC, reserved characters dropped, whitespace collapsed, trailing dots and
/// spaces trimmed (Windows refuses them).
pub fn sanitize_component(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let mut cleaned = String::with_capacity(nfc.len());
    for c in nfc.chars() {
        if RESERVED.contains(&c) || c.is_control() {
            continue;
        }
        cleaned.push(c);
    }
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(['.', ' ']).to_string()
}

fn titled_dir(title: &str, year: Option<i32>) -> String {
    match year {
        Some(year) => sanitize_component(&format!("{title} ({year})")),
        None => sanitize_component(title),
    }
}

/// Episode file and directory path. `episodes` must be a contiguous
/// ascending run; multi-episode files carry an `E..-E..` range and all
/// titles joined with ` & `.
pub fn tv_path(
    show: &str,
    year: Option<i32>,
    season: u32,
    episodes: &[u32],
    titles: &[String],
    ext: &str,
) -> PathBuf {
    let show_dir = titled_dir(show, year);
    let season_dir = format!("Season {season:02}");
    let show_clean = sanitize_component(show);

    let episode_part = match (episodes.first(), episodes.last()) {
        (Some(first), Some(last)) if first != last => {
            format!("S{season:02}E{first:02}-E{last:02}")
        }
        (Some(first), _) => format!("S{season:02}E{first:02}"),
        _ => format!("S{season:02}"),
    };

    let mut file = format!("{show_clean} - {episode_part}");
    if !titles.is_empty() {
        let joined = titles
            .iter()
            .map(|t| sanitize_component(t))
            .collect::<Vec<_>>()
            .join(" & ");
        file.push_str(" - ");
        file.push_str(&joined);
    }
    file.push('.');
    file.push_str(ext);

    PathBuf::from(show_dir).join(season_dir).join(file)
}

pub fn movie_path(title: &str, year: Option<i32>, ext: &str) -> PathBuf {
    let dir = titled_dir(title, year);
    PathBuf::from(&dir).join(format!("{dir}.{ext}"))
}

pub fn music_path(
    artist: &str,
    album: &str,
    year: Option<i32>,
    track: u32,
    title: &str,
    ext: &str,
) -> PathBuf {
    PathBuf::from(sanitize_component(artist))
        .join(titled_dir(album, year))
        .join(format!(
            "Track{track:02} - {}.{ext}",
            sanitize_component(title)
        ))
}
