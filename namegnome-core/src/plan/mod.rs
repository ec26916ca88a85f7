//! Plan assembly: merging deterministic and assisted candidates into a
//! stable, schema-versioned [`PlanReview`].

pub mod canonical;
pub mod naming;

pub use canonical::{to_canonical_json, to_canonical_json_masked};

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;

use namegnome_model::{
    ConfidenceBucket, EpisodeSpan, MovieTarget, PlanAlternative, PlanDestination, PlanGroup,
    PlanItem, PlanOrigin, PlanReview, PlanRollup, PlanSource, PlanSummary, SourceAttribution,
    TrackTarget, WarningCode,
};
use namegnome_model::{PLAN_SCHEMA_VERSION, ScanSnapshot};

use crate::error::Result;
use crate::normalize::natural_cmp;
use crate::scanner::ID_NAMESPACE;

/// An LLM candidate must beat the deterministic one by at least this much to
/// replace it.
const MERGE_DELTA: f64 = 0.10;

/// A candidate mapping before ids, buckets and destinations are fixed.
#[derive(Debug, Clone)]
pub struct DraftItem {
    pub src_path: PathBuf,
    pub segment: Option<u32>,
    pub origin: PlanOrigin,
    pub confidence: f64,
    pub episode: Option<EpisodeSpan>,
    pub movie: Option<MovieTarget>,
    pub track: Option<TrackTarget>,
    /// Display name and year for the destination directory (TV only).
    pub show_title: Option<String>,
    pub show_year: Option<i32>,
    pub sources: Vec<SourceAttribution>,
    pub warnings: Vec<WarningCode>,
    pub anthology: bool,
    pub disambiguation: Option<String>,
    pub alternatives: Vec<PlanAlternative>,
    pub explain: Option<String>,
    /// Unresolved items keep their source path as destination.
    pub no_op: bool,
}

impl DraftItem {
    fn extension(&self) -> String {
        self.src_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase()
    }

    /// Destination path per the naming grammar; no-op items stay put.
    fn destination(&self) -> PathBuf {
        if self.no_op {
            return self.src_path.clone();
        }
        if let Some(span) = &self.episode {
            let show = self.show_title.as_deref().unwrap_or("Unknown Show");
            return naming::tv_path(
                show,
                self.show_year,
                span.season,
                &span.episodes,
                &span.titles,
                &self.extension(),
            );
        }
        if let Some(movie) = &self.movie {
            return naming::movie_path(&movie.title, movie.year, &self.extension());
        }
        if let Some(track) = &self.track {
            return naming::music_path(
                &track.artist,
                &track.album,
                self.show_year,
                track.track,
                &track.title,
                &self.extension(),
            );
        }
        self.src_path.clone()
    }
}

/// §merge policy: deterministic wins unless the LLM candidate beats it by
/// `MERGE_DELTA`; the loser of a near-tie is kept under `alternatives` with
/// a tie-breaker warning.
pub fn merge_candidates(
    deterministic: Vec<DraftItem>,
    assisted: Vec<DraftItem>,
) -> Vec<DraftItem> {
    let mut merged = Vec::with_capacity(deterministic.len());
    let mut assisted = assisted.into_iter();
    for mut det in deterministic {
        let Some(llm) = assisted.next() else {
            merged.push(det);
            continue;
        };
        if llm.confidence - det.confidence >= MERGE_DELTA {
            let mut winner = llm;
            winner.alternatives.push(PlanAlternative {
                origin: det.origin,
                confidence: det.confidence,
                path: det.destination(),
                episodes: det
                    .episode
                    .as_ref()
                    .map(|span| span.episodes.clone())
                    .unwrap_or_default(),
            });
            merged.push(winner);
        } else {
            det.alternatives.push(PlanAlternative {
                origin: llm.origin,
                confidence: llm.confidence,
                path: llm.destination(),
                episodes: llm
                    .episode
                    .as_ref()
                    .map(|span| span.episodes.clone())
                    .unwrap_or_default(),
            });
            if !det
                .warnings
                .contains(&WarningCode::TieBreakerDeterministicPreferred)
            {
                det.warnings
                    .push(WarningCode::TieBreakerDeterministicPreferred);
            }
            merged.push(det);
        }
    }
    merged.extend(assisted);
    merged
}

fn within_file_order(a: &PlanItem, b: &PlanItem) -> Ordering {
    match (&a.dst.episode, &b.dst.episode) {
        (Some(x), Some(y)) => {
            let min_x = x.episodes.first().copied().unwrap_or(0);
            let min_y = y.episodes.first().copied().unwrap_or(0);
            return (x.season, min_x).cmp(&(y.season, min_y));
        }
        _ => {}
    }
    match (&a.dst.movie, &b.dst.movie) {
        (Some(x), Some(y)) => {
            return (x.year.unwrap_or(i32::MAX), x.title.as_str())
                .cmp(&(y.year.unwrap_or(i32::MAX), y.title.as_str()));
        }
        _ => {}
    }
    match (&a.dst.track, &b.dst.track) {
        (Some(x), Some(y)) => (x.disc, x.track).cmp(&(y.disc, y.track)),
        _ => Ordering::Equal,
    }
}

fn item_order(a: &PlanItem, b: &PlanItem) -> Ordering {
    natural_cmp(&a.src.path.to_string_lossy(), &b.src.path.to_string_lossy())
        .then_with(|| within_file_order(a, b))
        .then_with(|| a.src.segment.cmp(&b.src.segment))
}

/// Assemble merged drafts into the final artifact: bucketing, stable
/// ordering, grouping by source file, summary counts.
pub fn assemble(
    snapshot: &ScanSnapshot,
    drafts: Vec<DraftItem>,
    notes: Vec<String>,
) -> Result<PlanReview> {
    let plan_id = Uuid::new_v5(
        &ID_NAMESPACE,
        format!("plan:{}:{}", snapshot.fingerprint, snapshot.media_type).as_bytes(),
    );

    let mut items: Vec<PlanItem> = drafts
        .into_iter()
        .map(|draft| {
            let confidence = if draft.confidence.is_finite() {
                draft.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let dst_path = draft.destination();
            let id = Uuid::new_v5(
                &ID_NAMESPACE,
                format!(
                    "item:{}:{}:{}",
                    draft.src_path.display(),
                    draft.segment.map_or(-1i64, i64::from),
                    dst_path.display()
                )
                .as_bytes(),
            );
            let mut warnings = draft.warnings.clone();
            warnings.sort_unstable();
            warnings.dedup();
            PlanItem {
                id,
                origin: draft.origin,
                confidence,
                bucket: ConfidenceBucket::from_confidence(confidence),
                src: PlanSource {
                    path: draft.src_path.clone(),
                    segment: draft.segment,
                },
                dst: PlanDestination {
                    path: dst_path,
                    episode: draft.episode,
                    movie: draft.movie,
                    track: draft.track,
                },
                sources: draft.sources,
                warnings,
                anthology: draft.anthology,
                disambiguation: draft.disambiguation,
                alternatives: draft.alternatives,
                explain: draft.explain,
            }
        })
        .collect();

    items.sort_by(item_order);

    // Groups cluster items by source path, in item order.
    let mut groups: Vec<PlanGroup> = Vec::new();
    for item in &items {
        let matches_last = groups
            .last()
            .is_some_and(|g| g.source_path == item.src.path);
        if !matches_last {
            groups.push(PlanGroup {
                source_path: item.src.path.clone(),
                item_ids: Vec::new(),
                rollup: PlanRollup {
                    count: 0,
                    min_confidence: 1.0,
                    max_confidence: 0.0,
                    warnings: Vec::new(),
                },
            });
        }
        let group = groups.last_mut().expect("group was just pushed");
        group.item_ids.push(item.id);
        group.rollup.count += 1;
        group.rollup.min_confidence = group.rollup.min_confidence.min(item.confidence);
        group.rollup.max_confidence = group.rollup.max_confidence.max(item.confidence);
        group.rollup.warnings.extend(item.warnings.iter().copied());
    }
    for group in &mut groups {
        group.rollup.warnings.sort_unstable();
        group.rollup.warnings.dedup();
    }

    let mut summary = PlanSummary {
        total_items: items.len(),
        ..PlanSummary::default()
    };
    for item in &items {
        *summary
            .by_origin
            .entry(item.origin.as_str().to_string())
            .or_insert(0) += 1;
        *summary
            .by_bucket
            .entry(item.bucket.as_str().to_string())
            .or_insert(0) += 1;
        for warning in &item.warnings {
            *summary.warnings.entry(warning.to_string()).or_insert(0) += 1;
        }
        if item.anthology {
            summary.anthology_candidates += 1;
        }
        if item.disambiguation.is_some() {
            summary.disambiguations_required += 1;
        }
    }

    Ok(PlanReview {
        plan_id,
        schema_version: PLAN_SCHEMA_VERSION.to_string(),
        generated_at: Utc::now(),
        scan_id: snapshot.scan_id,
        source_fingerprint: snapshot.fingerprint.clone(),
        media_type: snapshot.media_type,
        summary,
        groups,
        items,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use namegnome_model::MediaType;

    fn tv_draft(path: &str, season: u32, episodes: Vec<u32>, confidence: f64) -> DraftItem {
        DraftItem {
            src_path: PathBuf::from(path),
            segment: None,
            origin: PlanOrigin::Deterministic,
            confidence,
            episode: Some(EpisodeSpan {
                season,
                titles: episodes.iter().map(|e| format!("Ep {e}")).collect(),
                episodes,
            }),
            movie: None,
            track: None,
            show_title: Some("Show".to_string()),
            show_year: Some(2020),
            sources: Vec::new(),
            warnings: Vec::new(),
            anthology: false,
            disambiguation: None,
            alternatives: Vec::new(),
            explain: None,
            no_op: false,
        }
    }

    fn snapshot() -> ScanSnapshot {
        ScanSnapshot {
            scan_id: Uuid::nil(),
            root: PathBuf::from("/media"),
            media_type: MediaType::Tv,
            fingerprint: "ab".repeat(32),
            scanned_at: Utc::now(),
            files: Vec::new(),
        }
    }

    #[test]
    fn items_sorted_naturally_by_source_path() {
        let drafts = vec![
            tv_draft("/media/S10.mkv", 10, vec![1], 1.0),
            tv_draft("/media/S2.mkv", 2, vec![1], 1.0),
        ];
        let review = assemble(&snapshot(), drafts, Vec::new()).unwrap();
        assert_eq!(review.items[0].src.path, PathBuf::from("/media/S2.mkv"));
        assert_eq!(review.items[1].src.path, PathBuf::from("/media/S10.mkv"));
    }

    #[test]
    fn buckets_follow_confidence() {
        let drafts = vec![
            tv_draft("/media/a.mkv", 1, vec![1], 0.95),
            tv_draft("/media/b.mkv", 1, vec![2], 0.75),
            tv_draft("/media/c.mkv", 1, vec![3], 0.3),
        ];
        let review = assemble(&snapshot(), drafts, Vec::new()).unwrap();
        let buckets: Vec<ConfidenceBucket> = review.items.iter().map(|i| i.bucket).collect();
        assert_eq!(
            buckets,
            vec![
                ConfidenceBucket::High,
                ConfidenceBucket::Medium,
                ConfidenceBucket::Low
            ]
        );
        assert_eq!(review.summary.by_bucket["high"], 1);
        assert_eq!(review.summary.by_bucket["low"], 1);
    }

    #[test]
    fn groups_cluster_by_source_file_with_rollup() {
        let mut seg0 = tv_draft("/media/double.mkv", 1, vec![1], 1.0);
        seg0.segment = Some(0);
        let mut seg1 = tv_draft("/media/double.mkv", 1, vec![2], 0.8);
        seg1.segment = Some(1);
        seg1.warnings.push(WarningCode::TitleLowMatch);
        let review = assemble(&snapshot(), vec![seg0, seg1], Vec::new()).unwrap();
        assert_eq!(review.groups.len(), 1);
        let group = &review.groups[0];
        assert_eq!(group.item_ids.len(), 2);
        assert!((group.rollup.min_confidence - 0.8).abs() < 1e-9);
        assert!((group.rollup.max_confidence - 1.0).abs() < 1e-9);
        assert_eq!(group.rollup.warnings, vec![WarningCode::TitleLowMatch]);
    }

    #[test]
    fn merge_keeps_deterministic_on_near_tie() {
        let det = vec![tv_draft("/media/a.mkv", 1, vec![1], 0.85)];
        let mut llm = tv_draft("/media/a.mkv", 1, vec![1, 2], 0.9);
        llm.origin = PlanOrigin::Llm;
        let merged = merge_candidates(det, vec![llm]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin, PlanOrigin::Deterministic);
        assert!(
            merged[0]
                .warnings
                .contains(&WarningCode::TieBreakerDeterministicPreferred)
        );
        assert_eq!(merged[0].alternatives.len(), 1);
        assert_eq!(merged[0].alternatives[0].origin, PlanOrigin::Llm);
    }

    #[test]
    fn merge_prefers_clearly_better_llm_candidate() {
        let det = vec![tv_draft("/media/a.mkv", 1, vec![1], 0.5)];
        let mut llm = tv_draft("/media/a.mkv", 1, vec![1, 2], 0.95);
        llm.origin = PlanOrigin::Llm;
        let merged = merge_candidates(det, vec![llm]);
        assert_eq!(merged[0].origin, PlanOrigin::Llm);
        assert_eq!(merged[0].alternatives[0].origin, PlanOrigin::Deterministic);
    }

    #[test]
    fn plan_ids_are_deterministic_for_same_snapshot() {
        let review_a = assemble(
            &snapshot(),
            vec![tv_draft("/media/a.mkv", 1, vec![1], 1.0)],
            Vec::new(),
        )
        .unwrap();
        let review_b = assemble(
            &snapshot(),
            vec![tv_draft("/media/a.mkv", 1, vec![1], 1.0)],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(review_a.plan_id, review_b.plan_id);
        assert_eq!(review_a.items[0].id, review_b.items[0].id);
    }
}
