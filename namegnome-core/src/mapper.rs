//! Deterministic mapper: resolves scanned files to canonical entities and
//! builds candidate plan items from providers alone. The LLM only ever
//! refines anthology grouping, never entity identity.

use uuid::Uuid;

use namegnome_model::{
    DisambiguationCandidate, EntityKind, EpisodeRecord, EpisodeSpan, MediaFile, MediaType,
    MovieTarget, PlanOrigin, ProviderKind, ProviderRef, SearchCandidate, SourceAttribution,
    TrackTarget, WarningCode,
};
use namegnome_model::decision::YEAR_UNKNOWN;
use tracing::{debug, warn};

use crate::anthology::llm::GroupingModel;
use crate::anthology::{self, ResolvedGroup};
use crate::disambig::DisambiguationLedger;
use crate::error::{CoreError, Result};
use crate::normalize::{normalize_title, token_score, tokens};
use crate::plan::{DraftItem, merge_candidates};
use crate::providers::ProviderGateway;

/// Minimum title-token overlap for a search hit to count as plausible.
const PLAUSIBLE_SCORE: f64 = 0.67;

/// How many candidates a disambiguation prompt carries at most.
const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    pub anthology: bool,
    pub offline: bool,
    pub provider: Option<ProviderKind>,
    pub use_llm: bool,
}

pub struct Mapper<'a> {
    gateway: &'a ProviderGateway,
    ledger: &'a DisambiguationLedger,
    options: &'a PlanOptions,
}

impl std::fmt::Debug for Mapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper").finish_non_exhaustive()
    }
}

fn blank_draft(file: &MediaFile) -> DraftItem {
    DraftItem {
        src_path: file.path.clone(),
        segment: None,
        origin: PlanOrigin::Deterministic,
        confidence: 1.0,
        episode: None,
        movie: None,
        track: None,
        show_title: None,
        show_year: None,
        sources: Vec::new(),
        warnings: Vec::new(),
        anthology: false,
        disambiguation: None,
        alternatives: Vec::new(),
        explain: None,
        no_op: false,
    }
}

fn needs_review_draft(file: &MediaFile, explain: String) -> DraftItem {
    let mut draft = blank_draft(file);
    draft.confidence = 0.2;
    draft.warnings.push(WarningCode::NeedsReview);
    draft.explain = Some(explain);
    draft.no_op = true;
    draft
}

static PAREN_YEAR: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"\s*\((?:19|20)\d{2}\)").unwrap());

/// Candidate titles often carry a `(Year)` suffix; strip it before scoring.
/// A bare year inside the title ("Blade Runner 2049") is kept.
fn candidate_tokens(title: &str) -> Vec<String> {
    tokens(&PAREN_YEAR.replace_all(title, " "))
}

impl<'a> Mapper<'a> {
    pub fn new(
        gateway: &'a ProviderGateway,
        ledger: &'a DisambiguationLedger,
        options: &'a PlanOptions,
    ) -> Self {
        Self {
            gateway,
            ledger,
            options,
        }
    }

    /// Map one file to zero or more drafts. Per-item provider failures are
    /// downgraded to `needs_review` no-ops; ambiguity aborts with a
    /// disambiguation signal.
    pub async fn map_file(
        &self,
        scan_id: Uuid,
        file: &MediaFile,
        llm: Option<&dyn GroupingModel>,
    ) -> Result<Vec<DraftItem>> {
        let result = match file.media_type {
            MediaType::Tv => self.map_tv(scan_id, file, llm).await,
            MediaType::Movie => self.map_movie(scan_id, file).await,
            MediaType::Music => self.map_music(scan_id, file).await,
        };
        match result {
            Ok(drafts) => Ok(drafts),
            Err(CoreError::ProviderUnavailable { message, .. }) => {
                warn!(path = %crate::logging::redacted(&file.path), message, "provider unavailable, needs review");
                Ok(vec![needs_review_draft(
                    file,
                    format!("provider unavailable: {message}"),
                )])
            }
            Err(other) => Err(other),
        }
    }

    // ----- entity resolution -----

    /// Decision lookup, then search. Unique hits pin silently; several
    /// plausible hits raise a disambiguation signal.
    async fn resolve_entity(
        &self,
        scan_id: Uuid,
        scope: &str,
        field: &str,
        media_type: MediaType,
        entity_kind: EntityKind,
        title: &str,
        year: Option<i32>,
        strict_year: bool,
    ) -> Result<Option<ProviderRef>> {
        let title_norm = normalize_title(title);
        let year_key = year.unwrap_or(YEAR_UNKNOWN);

        if let Some(decision) = self
            .gateway
            .store()
            .get_decision(scope, &title_norm, year_key)
            .await?
        {
            debug!(scope, title_norm, "using pinned decision");
            return Ok(Some(ProviderRef::new(
                decision.provider,
                entity_kind,
                decision.ext_id,
            )));
        }

        let candidates = self
            .gateway
            .search(media_type, title, year, self.options.offline)
            .await?;
        let wanted = tokens(&title_norm);
        let mut plausible: Vec<SearchCandidate> = candidates
            .into_iter()
            .filter(|candidate| {
                self.options
                    .provider
                    .is_none_or(|p| candidate.provider == p)
            })
            .filter(|candidate| token_score(&wanted, &candidate_tokens(&candidate.title)) >= PLAUSIBLE_SCORE)
            .collect();

        if let Some(year) = year {
            let exact: Vec<SearchCandidate> = plausible
                .iter()
                .filter(|candidate| candidate.year == Some(year))
                .cloned()
                .collect();
            if exact.len() == 1 {
                let hit = &exact[0];
                return Ok(Some(ProviderRef::new(hit.provider, hit.kind, hit.ext_id.clone())));
            }
            if !exact.is_empty() || strict_year {
                plausible = if exact.is_empty() { plausible } else { exact };
            }
        }

        match plausible.len() {
            0 => Ok(None),
            1 => {
                let hit = &plausible[0];
                Ok(Some(ProviderRef::new(hit.provider, hit.kind, hit.ext_id.clone())))
            }
            _ => {
                let pending = self
                    .ledger
                    .mint(
                        scan_id,
                        field,
                        scope,
                        &title_norm,
                        year_key,
                        plausible
                            .into_iter()
                            .take(MAX_CANDIDATES)
                            .map(|candidate| DisambiguationCandidate {
                                provider: candidate.provider,
                                id: candidate.ext_id,
                                title: candidate.title,
                                year: candidate.year,
                            })
                            .collect(),
                    )
                    .await?;
                Err(CoreError::DisambiguationRequired(Box::new(pending)))
            }
        }
    }

    // ----- TV -----

    async fn map_tv(
        &self,
        scan_id: Uuid,
        file: &MediaFile,
        llm: Option<&dyn GroupingModel>,
    ) -> Result<Vec<DraftItem>> {
        let Some(show) = file.title.as_deref() else {
            return Ok(vec![needs_review_draft(
                file,
                "no show title parsed from filename".to_string(),
            )]);
        };
        let Some(series_ref) = self
            .resolve_entity(
                scan_id,
                "tv",
                "series",
                MediaType::Tv,
                EntityKind::Series,
                show,
                file.year,
                false,
            )
            .await?
        else {
            return Ok(vec![needs_review_draft(
                file,
                format!("no provider match for series '{show}'"),
            )]);
        };

        let entity = self.gateway.fetch(&series_ref, self.options.offline).await?;
        let children = self
            .gateway
            .list_children(&series_ref, self.options.offline)
            .await?;
        let episodes = match children {
            namegnome_model::Children::Episodes(episodes) => episodes,
            namegnome_model::Children::Tracks(_) => Vec::new(),
        };
        let season = file.season.unwrap_or(1);
        let attribution = SourceAttribution {
            provider: entity.provider,
            id: entity.ext_id.clone(),
            kind: EntityKind::Series,
        };

        if self.options.anthology && !file.segments.is_empty() {
            self.map_tv_anthology(file, &entity, &episodes, season, attribution, llm)
                .await
        } else {
            Ok(vec![self.map_tv_direct(file, &entity, &episodes, season, attribution)])
        }
    }

    fn map_tv_direct(
        &self,
        file: &MediaFile,
        entity: &namegnome_model::ProviderEntity,
        episodes: &[EpisodeRecord],
        season: u32,
        attribution: SourceAttribution,
    ) -> DraftItem {
        let mut draft = blank_draft(file);
        draft.show_title = Some(entity.title.clone());
        draft.show_year = entity.year;
        draft.sources.push(attribution);

        let mut titles = Vec::new();
        for number in &file.episodes {
            match episodes
                .iter()
                .find(|e| e.season == season && e.episode == *number)
            {
                Some(episode) => titles.push(episode.title.clone()),
                None => {
                    draft.confidence = 0.2;
                    draft.warnings.push(WarningCode::EpisodeNotFound);
                    draft.warnings.push(WarningCode::NeedsReview);
                    draft.no_op = true;
                    draft.explain = Some(format!(
                        "S{season:02}E{number:02} not in the canonical episode list"
                    ));
                    return draft;
                }
            }
        }

        draft.episode = Some(EpisodeSpan {
            season,
            episodes: file.episodes.clone(),
            titles,
        });
        draft.anthology = file.episodes.len() > 1;
        draft.explain = Some("episode numbers resolved exactly".to_string());
        draft
    }

    async fn map_tv_anthology(
        &self,
        file: &MediaFile,
        entity: &namegnome_model::ProviderEntity,
        episodes: &[EpisodeRecord],
        season: u32,
        attribution: SourceAttribution,
        llm: Option<&dyn GroupingModel>,
    ) -> Result<Vec<DraftItem>> {
        let groups = anthology::resolve(&file.segments, season, episodes);
        let unresolved = groups.iter().any(ResolvedGroup::needs_assist);

        let group_draft = |group: &ResolvedGroup, ordinal: usize, origin: PlanOrigin| {
            let mut draft = blank_draft(file);
            draft.segment = Some(ordinal as u32);
            draft.origin = origin;
            draft.confidence = group.confidence;
            draft.show_title = Some(entity.title.clone());
            draft.show_year = entity.year;
            draft.sources.push(attribution.clone());
            draft.warnings = group.warnings.clone();
            draft.anthology = group.episodes.len() > 1 || file.segments.len() > 1;
            draft.episode = Some(EpisodeSpan {
                season: group.season,
                episodes: group.episodes.clone(),
                titles: group.titles.clone(),
            });
            draft.explain = Some(match origin {
                PlanOrigin::Deterministic => "grouped by interval refinement".to_string(),
                PlanOrigin::Llm => "grouping proposed by assist model".to_string(),
            });
            draft
        };

        let deterministic: Vec<DraftItem> = groups
            .iter()
            .enumerate()
            .map(|(ordinal, group)| group_draft(group, ordinal, PlanOrigin::Deterministic))
            .collect();

        if !unresolved || !self.options.use_llm {
            return Ok(deterministic);
        }
        let Some(model) = llm else {
            return Ok(deterministic);
        };

        match anthology::llm::assist(model, &file.segments, &groups, season, episodes).await {
            Ok(assisted_groups) => {
                let assisted: Vec<DraftItem> = assisted_groups
                    .iter()
                    .enumerate()
                    .map(|(ordinal, group)| group_draft(group, ordinal, PlanOrigin::Llm))
                    .collect();
                Ok(merge_candidates(deterministic, assisted))
            }
            Err(CoreError::SchemaViolation(message)) => {
                // Degrade: deterministic result plus the rejection marker.
                warn!(message, "assist output rejected");
                Ok(deterministic
                    .into_iter()
                    .map(|mut draft| {
                        if !draft.warnings.contains(&WarningCode::LlmUnavailable) {
                            draft.warnings.push(WarningCode::LlmUnavailable);
                        }
                        draft
                    })
                    .collect())
            }
            Err(other) => Err(other),
        }
    }

    // ----- movies -----

    async fn map_movie(&self, scan_id: Uuid, file: &MediaFile) -> Result<Vec<DraftItem>> {
        let Some(title) = file.title.as_deref() else {
            return Ok(vec![needs_review_draft(
                file,
                "no movie title parsed from filename".to_string(),
            )]);
        };
        let Some(movie_ref) = self
            .resolve_entity(
                scan_id,
                "movie",
                "movie",
                MediaType::Movie,
                EntityKind::Movie,
                title,
                file.year,
                true,
            )
            .await?
        else {
            return Ok(vec![needs_review_draft(
                file,
                format!("no provider match for movie '{title}'"),
            )]);
        };

        let entity = self.gateway.fetch(&movie_ref, self.options.offline).await?;
        let mut draft = blank_draft(file);
        draft.sources.push(SourceAttribution {
            provider: entity.provider,
            id: entity.ext_id.clone(),
            kind: EntityKind::Movie,
        });
        draft.movie = Some(MovieTarget {
            title: entity.title.clone(),
            year: entity.year,
        });

        if file.year.is_some() && entity.year == file.year {
            draft.confidence = 1.0;
            draft.explain = Some("title and year matched exactly".to_string());
        } else {
            draft.confidence = 0.9;
            draft.warnings.push(WarningCode::YearMissing);
            draft.explain = Some("title matched; year absent from filename".to_string());
        }
        Ok(vec![draft])
    }

    // ----- music -----

    async fn map_music(&self, scan_id: Uuid, file: &MediaFile) -> Result<Vec<DraftItem>> {
        let (Some(artist), Some(album), Some(track_number)) =
            (file.artist.as_deref(), file.album.as_deref(), file.track)
        else {
            return Ok(vec![needs_review_draft(
                file,
                "artist/album/track layout not recognized".to_string(),
            )]);
        };

        let Some(artist_ref) = self
            .resolve_entity(
                scan_id,
                "music_artist",
                "artist",
                MediaType::Music,
                EntityKind::Artist,
                artist,
                None,
                false,
            )
            .await?
        else {
            return Ok(vec![needs_review_draft(
                file,
                format!("no provider match for artist '{artist}'"),
            )]);
        };
        let artist_entity = self.gateway.fetch(&artist_ref, self.options.offline).await?;

        let album_ref = self
            .resolve_album(scan_id, &artist_ref, album, file.year)
            .await?;
        let Some(album_ref) = album_ref else {
            return Ok(vec![needs_review_draft(
                file,
                format!("album '{album}' not found for artist '{artist}'"),
            )]);
        };
        let album_entity = self.gateway.fetch(&album_ref, self.options.offline).await?;

        let children = self
            .gateway
            .list_children(&album_ref, self.options.offline)
            .await?;
        let tracks = match children {
            namegnome_model::Children::Tracks(tracks) => tracks,
            namegnome_model::Children::Episodes(_) => Vec::new(),
        };

        let disc = file.disc.unwrap_or(1);
        let Some(track) = tracks
            .iter()
            .find(|t| t.track == track_number && (file.disc.is_none() || t.disc == disc))
        else {
            return Ok(vec![needs_review_draft(
                file,
                format!("track {track_number:02} not in canonical track list"),
            )]);
        };

        let mut draft = blank_draft(file);
        draft.show_year = album_entity.year;
        draft.sources.push(SourceAttribution {
            provider: album_entity.provider,
            id: album_entity.ext_id.clone(),
            kind: EntityKind::Album,
        });
        draft.track = Some(TrackTarget {
            artist: artist_entity.title.clone(),
            album: album_entity.title.clone(),
            disc: track.disc,
            track: track.track,
            title: track.title.clone(),
        });
        draft.explain = Some("track number resolved exactly".to_string());
        Ok(vec![draft])
    }

    async fn resolve_album(
        &self,
        scan_id: Uuid,
        artist_ref: &ProviderRef,
        album: &str,
        year: Option<i32>,
    ) -> Result<Option<ProviderRef>> {
        let album_norm = normalize_title(album);
        let year_key = year.unwrap_or(YEAR_UNKNOWN);
        if let Some(decision) = self
            .gateway
            .store()
            .get_decision("music_album", &album_norm, year_key)
            .await?
        {
            return Ok(Some(ProviderRef::new(
                decision.provider,
                EntityKind::Album,
                decision.ext_id,
            )));
        }

        let albums = self
            .gateway
            .search_children(artist_ref, self.options.offline)
            .await?;
        let wanted = tokens(&album_norm);
        let mut plausible: Vec<SearchCandidate> = albums
            .into_iter()
            .filter(|candidate| token_score(&wanted, &candidate_tokens(&candidate.title)) >= PLAUSIBLE_SCORE)
            .collect();
        if let Some(year) = year {
            let exact: Vec<SearchCandidate> = plausible
                .iter()
                .filter(|candidate| candidate.year == Some(year))
                .cloned()
                .collect();
            if !exact.is_empty() {
                plausible = exact;
            }
        }

        match plausible.len() {
            0 => Ok(None),
            1 => {
                let hit = &plausible[0];
                Ok(Some(ProviderRef::new(hit.provider, hit.kind, hit.ext_id.clone())))
            }
            _ => {
                let pending = self
                    .ledger
                    .mint(
                        scan_id,
                        "album",
                        "music_album",
                        &album_norm,
                        year_key,
                        plausible
                            .into_iter()
                            .take(MAX_CANDIDATES)
                            .map(|candidate| DisambiguationCandidate {
                                provider: candidate.provider,
                                id: candidate.ext_id,
                                title: candidate.title,
                                year: candidate.year,
                            })
                            .collect(),
                    )
                    .await?;
                Err(CoreError::DisambiguationRequired(Box::new(pending)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_tokens_drop_year_suffix() {
        assert_eq!(candidate_tokens("Danger Mouse (2015)"), vec!["danger", "mouse"]);
        assert_eq!(candidate_tokens("Blade Runner 2049"), vec!["blade", "runner", "2049"]);
    }
}
