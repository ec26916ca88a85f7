//! Anthology resolution: mapping multi-segment filenames onto contiguous
//! canonical episode runs.
//!
//! Deterministic first. Declared numeric ranges are treated as unreliable
//! (first-pass parses overlap), titles as truncated or moniker-prefixed; the
//! interval refinement below fixes what it can and flags the rest. The LLM
//! assist in [`llm`] is consulted only for the residue.

pub mod llm;

use std::collections::{BTreeMap, BTreeSet};

use namegnome_model::{EpisodeRecord, Segment, WarningCode};

use crate::normalize::token_score;
use crate::normalize::tokens as tokenize;

/// Acceptance threshold for a title match.
pub const THETA_MATCH: f64 = 0.67;
/// Stricter threshold for collapsing a declared range onto one episode.
pub const THETA_SINGLE: f64 = 0.8;

/// Longest shared leading phrase treated as a moniker.
const MONIKER_MAX_TOKENS: usize = 6;
/// One-token prefixes ("Pups …") are theme words, not monikers.
const MONIKER_MIN_TOKENS: usize = 2;

const CONFIDENCE_FLOOR: f64 = 0.2;
const CONFIDENCE_STEP: f64 = 0.1;

/// One resolved grouping: a contiguous episode run for a source segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGroup {
    pub season: u32,
    pub episodes: Vec<u32>,
    pub titles: Vec<String>,
    pub confidence: f64,
    pub warnings: Vec<WarningCode>,
}

impl ResolvedGroup {
    /// Unresolved flags (or weak confidence) trigger the LLM assist.
    pub fn needs_assist(&self) -> bool {
        self.confidence < 0.9
            || self.warnings.iter().any(|w| {
                matches!(
                    w,
                    WarningCode::OverlapUnresolved
                        | WarningCode::GapPresent
                        | WarningCode::EpisodeNotFound
                )
            })
    }
}

/// Canonical episode view for one season: raw titles plus moniker-stripped
/// token lists. Only ordered containers; resolution must not depend on
/// iteration order.
struct Canon<'a> {
    records: BTreeMap<u32, &'a EpisodeRecord>,
    stripped: BTreeMap<u32, Vec<String>>,
    monikers: BTreeMap<u32, Vec<String>>,
}

impl<'a> Canon<'a> {
    fn build(season: u32, canonical: &'a [EpisodeRecord]) -> Self {
        let records: BTreeMap<u32, &EpisodeRecord> = canonical
            .iter()
            .filter(|e| e.season == season)
            .map(|e| (e.episode, e))
            .collect();
        let raw_tokens: BTreeMap<u32, Vec<String>> = records
            .iter()
            .map(|(num, e)| (*num, tokenize(&e.title)))
            .collect();

        let numbers: Vec<u32> = records.keys().copied().collect();
        let mut stripped = BTreeMap::new();
        let mut monikers = BTreeMap::new();
        for (index, number) in numbers.iter().enumerate() {
            let own = &raw_tokens[number];
            let prev = index
                .checked_sub(1)
                .map(|i| shared_prefix(own, &raw_tokens[&numbers[i]]))
                .unwrap_or(0);
            let next = numbers
                .get(index + 1)
                .map(|n| shared_prefix(own, &raw_tokens[n]))
                .unwrap_or(0);
            let len = prev.max(next).min(MONIKER_MAX_TOKENS);
            if len >= MONIKER_MIN_TOKENS && len < own.len() {
                monikers.insert(*number, own[..len].to_vec());
                stripped.insert(*number, own[len..].to_vec());
            } else {
                stripped.insert(*number, own.clone());
            }
        }
        Self {
            records,
            stripped,
            monikers,
        }
    }

    fn title(&self, episode: u32) -> Option<&str> {
        self.records.get(&episode).map(|e| e.title.as_str())
    }

    fn stripped_tokens(&self, episode: u32) -> Option<&[String]> {
        self.stripped.get(&episode).map(|t| t.as_slice())
    }

    fn moniker(&self, episode: u32) -> Option<&[String]> {
        self.monikers.get(&episode).map(|t| t.as_slice())
    }

    fn numbers_in(&self, low: u32, high: u32) -> Vec<u32> {
        self.records.range(low..=high).map(|(n, _)| *n).collect()
    }
}

fn shared_prefix(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[derive(Debug, Clone)]
struct WorkSeg {
    start: u32,
    end: u32,
    tokens: Vec<String>,
    /// Per-episode `(number, score)` once a split assignment is known.
    assigned: Option<Vec<(u32, f64)>>,
    moniker_stripped: bool,
    warnings: BTreeSet<WarningCode>,
}

impl WorkSeg {
    fn match_score(&self, canon: &Canon<'_>, episode: u32) -> f64 {
        if let Some(assigned) = &self.assigned {
            if let Some((_, score)) = assigned.iter().find(|(n, _)| *n == episode) {
                return *score;
            }
        }
        canon
            .stripped_tokens(episode)
            .map(|ct| token_score(&self.tokens, ct))
            .unwrap_or(0.0)
    }

    fn trim_assigned(&mut self) {
        if let Some(assigned) = &mut self.assigned {
            assigned.retain(|(n, _)| *n >= self.start && *n <= self.end);
            if assigned.is_empty() {
                self.assigned = None;
            }
        }
    }
}

/// Deterministic interval refinement. Given the file's ordered segments and
/// the canonical episode list for `(series, season)`, produce one resolved
/// group per surviving segment.
pub fn resolve(segments: &[Segment], season: u32, canonical: &[EpisodeRecord]) -> Vec<ResolvedGroup> {
    let canon = Canon::build(season, canonical);

    // 1. Sort & normalize: order by start, coerce a <= b.
    let mut segs: Vec<WorkSeg> = segments
        .iter()
        .map(|s| WorkSeg {
            start: s.start.min(s.end),
            end: s.start.max(s.end),
            tokens: s.title_tokens.clone(),
            assigned: None,
            moniker_stripped: false,
            warnings: BTreeSet::new(),
        })
        .collect();
    segs.sort_by_key(|s| (s.start, s.end));

    strip_segment_monikers(&mut segs);
    for seg in &mut segs {
        split_combined_titles(seg, &canon);
    }
    resolve_overlaps(&mut segs, &canon);
    fill_gaps(&mut segs, &canon);
    collapse_singletons(&mut segs, &canon);

    segs.iter().map(|seg| finalize(seg, season, &canon)).collect()
}

/// Step 5 (applied before matching): a leading phrase shared verbatim by two
/// or more adjacent segments is a moniker, not title content.
fn strip_segment_monikers(segs: &mut [WorkSeg]) {
    if segs.len() < 2 {
        return;
    }
    let mut strip_len = vec![0usize; segs.len()];
    for i in 0..segs.len() - 1 {
        let shared = shared_prefix(&segs[i].tokens, &segs[i + 1].tokens).min(MONIKER_MAX_TOKENS);
        if shared >= MONIKER_MIN_TOKENS {
            strip_len[i] = strip_len[i].max(shared);
            strip_len[i + 1] = strip_len[i + 1].max(shared);
        }
    }
    for (seg, len) in segs.iter_mut().zip(strip_len) {
        if len > 0 && len < seg.tokens.len() {
            seg.tokens.drain(..len);
            seg.moniker_stripped = true;
        }
    }
}

/// Leading-token skips worth trying before matching an episode title: zero,
/// plus any run that reproduces a prefix or suffix of the moniker (a moniker
/// occurs once up front but leaves residue between titles).
fn moniker_skips(moniker: Option<&[String]>, tokens: &[String], pos: usize) -> Vec<usize> {
    let mut skips = vec![0];
    if let Some(moniker) = moniker {
        for k in 1..=moniker.len() {
            if pos + k >= tokens.len() {
                break;
            }
            let window = &tokens[pos..pos + k];
            if window == &moniker[..k] || window == &moniker[moniker.len() - k..] {
                skips.push(k);
            }
        }
    }
    skips
}

/// A single title span may cover several canonical episodes back to back
/// (`Car In A Tree Dalmatian Day`). Greedily consume the span against
/// consecutive canonical titles; on full coverage of one or more episodes,
/// adopt the widened interval and the per-episode split.
fn split_combined_titles(seg: &mut WorkSeg, canon: &Canon<'_>) {
    if seg.tokens.is_empty() {
        return;
    }
    let tokens = &seg.tokens;
    let mut assigned = Vec::new();
    let mut pos = 0usize;
    let mut episode = seg.start;
    let mut moniker_used = false;

    while let Some(canonical_tokens) = canon.stripped_tokens(episode) {
        if canonical_tokens.is_empty() || pos >= tokens.len() {
            break;
        }
        let mut best: Option<(f64, usize, usize)> = None;
        for skip in moniker_skips(canon.moniker(episode), tokens, pos) {
            let window_start = pos + skip;
            let window_end = (window_start + canonical_tokens.len()).min(tokens.len());
            if window_start >= window_end {
                continue;
            }
            let score = token_score(&tokens[window_start..window_end], canonical_tokens);
            if score >= THETA_MATCH && best.is_none_or(|(s, _, _)| score > s) {
                best = Some((score, skip, window_end));
            }
        }
        let Some((score, skip, window_end)) = best else {
            break;
        };
        if skip > 0 {
            moniker_used = true;
        }
        assigned.push((episode, score));
        pos = window_end;
        episode += 1;
    }

    // Full consumption only: a partial walk proves nothing about the tail.
    if pos >= tokens.len() && !assigned.is_empty() {
        let widened = seg.start + assigned.len() as u32 - 1;
        if widened > seg.end {
            seg.end = widened;
        }
        seg.assigned = Some(assigned);
        if moniker_used {
            seg.moniker_stripped = true;
        }
    }
}

/// Step 2: resolve declared-range overlaps between adjacent segments.
fn resolve_overlaps(segs: &mut [WorkSeg], canon: &Canon<'_>) {
    for i in 0..segs.len().saturating_sub(1) {
        let (b, c, d) = (segs[i].end, segs[i + 1].start, segs[i + 1].end);
        if c > b {
            continue;
        }
        let second_anchors = segs[i + 1].match_score(canon, c) >= THETA_MATCH;
        if second_anchors && c > 0 && segs[i].start <= c - 1 {
            // The second segment demonstrably begins at c; truncate the first.
            segs[i].end = c - 1;
            segs[i].trim_assigned();
        } else if b + 1 <= d {
            segs[i + 1].start = b + 1;
            segs[i + 1].trim_assigned();
        } else {
            segs[i].warnings.insert(WarningCode::OverlapUnresolved);
            segs[i + 1].warnings.insert(WarningCode::OverlapUnresolved);
        }
    }
}

/// Step 3: detect gaps between adjacent segments. A lone canonical episode
/// inside the gap whose title still matches leftover tokens is inserted;
/// anything else is flagged.
fn fill_gaps(segs: &mut Vec<WorkSeg>, canon: &Canon<'_>) {
    let mut insertions: Vec<(usize, WorkSeg)> = Vec::new();
    for i in 0..segs.len().saturating_sub(1) {
        let (b, c) = (segs[i].end, segs[i + 1].start);
        if c <= b + 1 {
            continue;
        }
        let inside = canon.numbers_in(b + 1, c - 1);
        match inside.as_slice() {
            [] => {}
            [gap_episode] => {
                let score = segs[i]
                    .match_score(canon, *gap_episode)
                    .max(segs[i + 1].match_score(canon, *gap_episode));
                if score >= THETA_MATCH {
                    insertions.push((
                        i + 1,
                        WorkSeg {
                            start: *gap_episode,
                            end: *gap_episode,
                            tokens: canon
                                .stripped_tokens(*gap_episode)
                                .map(<[String]>::to_vec)
                                .unwrap_or_default(),
                            assigned: Some(vec![(*gap_episode, score)]),
                            moniker_stripped: false,
                            warnings: BTreeSet::new(),
                        },
                    ));
                } else {
                    segs[i].warnings.insert(WarningCode::GapPresent);
                }
            }
            _ => {
                segs[i].warnings.insert(WarningCode::GapPresent);
            }
        }
    }
    for (index, seg) in insertions.into_iter().rev() {
        segs.insert(index, seg);
    }
}

/// Step 4: a declared multi-episode interval whose single title pins the
/// first episode (and nothing after it) collapses to a singleton.
fn collapse_singletons(segs: &mut [WorkSeg], canon: &Canon<'_>) {
    for seg in segs.iter_mut() {
        if seg.end <= seg.start || seg.tokens.is_empty() {
            continue;
        }
        if let Some(assigned) = &seg.assigned {
            if assigned.len() > 1 {
                continue;
            }
        }
        let first = seg.match_score(canon, seg.start);
        if first < THETA_SINGLE {
            continue;
        }
        let rest_matches = (seg.start + 1..=seg.end).any(|e| {
            canon
                .stripped_tokens(e)
                .map(|ct| token_score(&seg.tokens, ct) >= THETA_MATCH)
                .unwrap_or(false)
        });
        if !rest_matches {
            seg.end = seg.start;
            seg.assigned = Some(vec![(seg.start, first)]);
        }
    }
}

fn finalize(seg: &WorkSeg, season: u32, canon: &Canon<'_>) -> ResolvedGroup {
    let mut warnings = seg.warnings.clone();
    if seg.moniker_stripped {
        warnings.insert(WarningCode::PrefixMonikerStripped);
    }

    let mut episodes = Vec::new();
    let mut titles = Vec::new();
    for episode in seg.start..=seg.end {
        episodes.push(episode);
        match canon.title(episode) {
            Some(title) => titles.push(title.to_string()),
            None => {
                warnings.insert(WarningCode::EpisodeNotFound);
            }
        }
    }

    if !seg.tokens.is_empty() && !warnings.contains(&WarningCode::EpisodeNotFound) {
        let score = match &seg.assigned {
            Some(assigned) if !assigned.is_empty() => {
                assigned.iter().map(|(_, s)| *s).fold(1.0_f64, f64::min)
            }
            _ => {
                // Unsplit interval: compare against the concatenated run.
                let mut combined = Vec::new();
                for episode in seg.start..=seg.end {
                    if let Some(ct) = canon.stripped_tokens(episode) {
                        combined.extend_from_slice(ct);
                    }
                }
                token_score(&seg.tokens, &combined)
            }
        };
        if score < THETA_MATCH {
            warnings.insert(WarningCode::TitleLowMatch);
        } else if score < THETA_SINGLE {
            warnings.insert(WarningCode::LowTokenOverlap);
        }
    }

    let confidence = (1.0 - CONFIDENCE_STEP * warnings.len() as f64).max(CONFIDENCE_FLOOR);

    ResolvedGroup {
        season,
        episodes,
        titles,
        confidence,
        warnings: warnings.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namegnome_model::ProviderKind;

    fn canonical(titles: &[(u32, &str)]) -> Vec<EpisodeRecord> {
        titles
            .iter()
            .map(|(number, title)| EpisodeRecord {
                provider: ProviderKind::Tvdb,
                series_id: "1".to_string(),
                season: 1,
                episode: *number,
                title: (*title).to_string(),
                air_date: None,
                metadata: serde_json::Value::Null,
            })
            .collect()
    }

    fn segment(start: u32, end: u32, title: &str) -> Segment {
        Segment {
            start,
            end,
            title_tokens: tokenize(title),
            offset: 0,
            len: title.len(),
        }
    }

    #[test]
    fn two_titles_in_one_span_expand_the_interval() {
        let canon = canonical(&[(1, "Car in a Tree"), (2, "Dalmatian Day"), (3, "Other")]);
        let groups = resolve(&[segment(1, 1, "Car In A Tree Dalmatian Day")], 1, &canon);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].episodes, vec![1, 2]);
        assert_eq!(groups[0].titles, vec!["Car in a Tree", "Dalmatian Day"]);
        assert!(groups[0].confidence >= 0.9, "got {}", groups[0].confidence);
        assert!(groups[0].warnings.is_empty());
    }

    #[test]
    fn overlapping_declared_ranges_are_simplified() {
        let canon = canonical(&[
            (1, "Alpha"),
            (2, "Bravo"),
            (3, "Charlie"),
            (4, "Delta"),
            (5, "Echo"),
        ]);
        let segments = [
            segment(1, 2, "Alpha Bravo"),
            segment(3, 4, "Charlie"),
            segment(4, 5, "Delta Echo"),
        ];
        let groups = resolve(&segments, 1, &canon);
        let intervals: Vec<Vec<u32>> = groups.iter().map(|g| g.episodes.clone()).collect();
        assert_eq!(intervals, vec![vec![1, 2], vec![3], vec![4, 5]]);
        assert!(
            groups
                .iter()
                .all(|g| !g.warnings.contains(&WarningCode::OverlapUnresolved))
        );
    }

    #[test]
    fn shared_moniker_is_stripped_before_matching() {
        let canon = canonical(&[
            (1, "Mighty Pups, Charged Up: Pups Stop a Humdinger Horde"),
            (2, "Mighty Pups, Charged Up: Pups Save a Mighty Lighthouse"),
        ]);
        let groups = resolve(
            &[segment(
                1,
                1,
                "Mighty Pups Charged Up Pups Stop A Humdinger Horde Pups Save A Mighty Lighthouse",
            )],
            1,
            &canon,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].episodes, vec![1, 2]);
        assert!(
            groups[0]
                .warnings
                .contains(&WarningCode::PrefixMonikerStripped)
        );
        assert!((groups[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn single_title_collapses_declared_range() {
        let canon = canonical(&[(1, "The Pilot"), (2, "Something Unrelated")]);
        let groups = resolve(&[segment(1, 2, "The Pilot")], 1, &canon);
        assert_eq!(groups[0].episodes, vec![1]);
    }

    #[test]
    fn lone_gap_episode_with_title_evidence_is_inserted() {
        let canon = canonical(&[(1, "Alpha"), (2, "Bravo"), (3, "Charlie")]);
        let segments = [segment(1, 1, "Alpha Bravo"), segment(3, 3, "Charlie")];
        // The first span expands onto episode 2, so there is no gap left.
        let groups = resolve(&segments, 1, &canon);
        let intervals: Vec<Vec<u32>> = groups.iter().map(|g| g.episodes.clone()).collect();
        assert_eq!(intervals, vec![vec![1, 2], vec![3]]);

        // With no token evidence, the gap is flagged instead.
        let segments = [segment(1, 1, "Alpha"), segment(3, 3, "Charlie")];
        let groups = resolve(&segments, 1, &canon);
        assert!(groups[0].warnings.contains(&WarningCode::GapPresent));
        assert!(groups[0].needs_assist());
    }

    #[test]
    fn unknown_episode_number_is_flagged() {
        let canon = canonical(&[(1, "Alpha")]);
        let groups = resolve(&[segment(7, 7, "Mystery")], 1, &canon);
        assert!(groups[0].warnings.contains(&WarningCode::EpisodeNotFound));
        assert!(groups[0].needs_assist());
    }

    #[test]
    fn deterministic_across_invocations() {
        let canon = canonical(&[(1, "Alpha"), (2, "Bravo"), (3, "Charlie")]);
        let segments = [segment(1, 2, "Alpha Bravo"), segment(3, 3, "Charlie")];
        let first = resolve(&segments, 1, &canon);
        for _ in 0..10 {
            assert_eq!(resolve(&segments, 1, &canon), first);
        }
    }
}
