use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use namegnome_config::ProviderSettings;
use namegnome_model::{
    Children, EntityKind, MediaType, ProviderEntity, ProviderKind, ProviderRef, SearchCandidate,
    TrackRecord,
};

use crate::normalize::normalize_title;
use crate::providers::http::{json_or_error, year_from_date};
use crate::providers::{MetadataProvider, ProviderError, ttl_for_kind};

const DEFAULT_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = "namegnome-serve/0.1 (https://github.com/namegnome/namegnome-serve)";

/// MusicBrainz client. Keyless, but etiquette requires a descriptive
/// User-Agent and roughly one request per second; the gateway's token bucket
/// enforces the pace.
pub struct MusicBrainzProvider {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for MusicBrainzProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicBrainzProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<ArtistHit>,
}

#[derive(Debug, Deserialize)]
struct ArtistHit {
    id: String,
    name: String,
    #[serde(rename = "life-span")]
    life_span: Option<LifeSpan>,
}

#[derive(Debug, Deserialize)]
struct LifeSpan {
    begin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupResponse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ReleaseGroupHit>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupHit {
    id: String,
    title: String,
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseListResponse {
    #[serde(default)]
    releases: Vec<ReleaseDto>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDto {
    #[serde(default)]
    media: Vec<MediumDto>,
}

#[derive(Debug, Deserialize)]
struct MediumDto {
    position: Option<u32>,
    #[serde(default)]
    tracks: Vec<TrackDto>,
}

#[derive(Debug, Deserialize)]
struct TrackDto {
    position: Option<u32>,
    title: String,
}

impl MusicBrainzProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(&[("fmt", "json")])
            .query(query)
            .send()
            .await?;
        json_or_error(response).await
    }

}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Musicbrainz
    }

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        _year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        if media_type != MediaType::Music {
            return Ok(Vec::new());
        }
        let lucene = format!("artist:{query}");
        let result: ArtistSearchResponse = self
            .get_json("/artist", &[("query", lucene.as_str()), ("limit", "10")])
            .await?;
        Ok(result
            .artists
            .into_iter()
            .map(|hit| SearchCandidate {
                provider: ProviderKind::Musicbrainz,
                kind: EntityKind::Artist,
                ext_id: hit.id,
                year: hit
                    .life_span
                    .and_then(|span| span.begin)
                    .as_deref()
                    .and_then(year_from_date),
                title: hit.name,
            })
            .collect())
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        match entity_ref.kind {
            EntityKind::Artist => {
                let hit: ArtistHit = self
                    .get_json(&format!("/artist/{}", entity_ref.ext_id), &[])
                    .await?;
                Ok(ProviderEntity {
                    provider: ProviderKind::Musicbrainz,
                    kind: EntityKind::Artist,
                    ext_id: hit.id,
                    title_norm: normalize_title(&hit.name),
                    year: hit
                        .life_span
                        .and_then(|span| span.begin)
                        .as_deref()
                        .and_then(year_from_date),
                    metadata: serde_json::Value::Null,
                    title: hit.name,
                    fetched_at: Utc::now(),
                    ttl_seconds: ttl_for_kind(EntityKind::Artist).as_secs() as i64,
                })
            }
            EntityKind::Album => {
                let hit: ReleaseGroupHit = self
                    .get_json(&format!("/release-group/{}", entity_ref.ext_id), &[])
                    .await?;
                Ok(ProviderEntity {
                    provider: ProviderKind::Musicbrainz,
                    kind: EntityKind::Album,
                    ext_id: hit.id,
                    title_norm: normalize_title(&hit.title),
                    year: hit
                        .first_release_date
                        .as_deref()
                        .and_then(year_from_date),
                    metadata: serde_json::Value::Null,
                    title: hit.title,
                    fetched_at: Utc::now(),
                    ttl_seconds: ttl_for_kind(EntityKind::Album).as_secs() as i64,
                })
            }
            _ => Err(ProviderError::NotFound),
        }
    }

    /// Albums of a pinned artist.
    async fn search_children(
        &self,
        parent: &ProviderRef,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        if parent.kind != EntityKind::Artist {
            return Ok(Vec::new());
        }
        let result: ReleaseGroupResponse = self
            .get_json(
                "/release-group",
                &[
                    ("artist", parent.ext_id.as_str()),
                    ("type", "album"),
                    ("limit", "100"),
                ],
            )
            .await?;
        Ok(result
            .release_groups
            .into_iter()
            .map(|hit| SearchCandidate {
                provider: ProviderKind::Musicbrainz,
                kind: EntityKind::Album,
                ext_id: hit.id,
                year: hit
                    .first_release_date
                    .as_deref()
                    .and_then(year_from_date),
                title: hit.title,
            })
            .collect())
    }

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        if entity_ref.kind != EntityKind::Album {
            return Err(ProviderError::NotFound);
        }
        // First release of the group carries the track list.
        let result: ReleaseListResponse = self
            .get_json(
                "/release",
                &[
                    ("release-group", entity_ref.ext_id.as_str()),
                    ("inc", "recordings"),
                    ("limit", "1"),
                ],
            )
            .await?;
        let Some(release) = result.releases.into_iter().next() else {
            return Ok(Children::Tracks(Vec::new()));
        };
        let mut tracks = Vec::new();
        for medium in release.media {
            let disc = medium.position.unwrap_or(1);
            for track in medium.tracks {
                let Some(position) = track.position else {
                    continue;
                };
                tracks.push(TrackRecord {
                    provider: ProviderKind::Musicbrainz,
                    album_id: entity_ref.ext_id.clone(),
                    disc,
                    track: position,
                    title: track.title,
                    metadata: serde_json::Value::Null,
                });
            }
        }
        tracks.sort_by_key(|t| (t.disc, t.track));
        Ok(Children::Tracks(tracks))
    }
}
