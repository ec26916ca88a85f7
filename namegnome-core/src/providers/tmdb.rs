use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use namegnome_config::ProviderSettings;
use namegnome_model::{
    Children, EntityKind, EpisodeRecord, MediaType, ProviderEntity, ProviderKind, ProviderRef,
    SearchCandidate,
};

use crate::normalize::normalize_title;
use crate::providers::http::{json_or_error, year_from_date};
use crate::providers::{MetadataProvider, ProviderError, ttl_for_kind};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

/// TMDB v3 client: api-key query parameter, no login dance. Primary for
/// movies, fallback-capable for TV via season listings.
pub struct TmdbProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for TmdbProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmdbProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MovieSearchResponse {
    #[serde(default)]
    results: Vec<MovieHit>,
}

#[derive(Debug, Deserialize)]
struct MovieHit {
    id: u64,
    title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvSearchResponse {
    #[serde(default)]
    results: Vec<TvHit>,
}

#[derive(Debug, Deserialize)]
struct TvHit {
    id: u64,
    name: String,
    first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    id: u64,
    title: String,
    release_date: Option<String>,
    #[serde(default)]
    runtime: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    id: u64,
    name: String,
    first_air_date: Option<String>,
    #[serde(default)]
    number_of_seasons: u32,
}

#[derive(Debug, Deserialize)]
struct SeasonDetails {
    #[serde(default)]
    episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Deserialize)]
struct SeasonEpisode {
    season_number: u32,
    episode_number: u32,
    name: String,
    air_date: Option<String>,
}

impl TmdbProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: settings.api_key.clone(),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("TMDB_API_KEY not set".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let key = self.key()?;
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(&[("api_key", key)])
            .query(query)
            .send()
            .await?;
        json_or_error(response).await
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tmdb
    }

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        match media_type {
            MediaType::Movie => {
                let year_param = year.map(|y| y.to_string());
                let mut params: Vec<(&str, &str)> = vec![("query", query)];
                if let Some(y) = year_param.as_deref() {
                    params.push(("year", y));
                }
                let result: MovieSearchResponse = self.get_json("/search/movie", &params).await?;
                Ok(result
                    .results
                    .into_iter()
                    .map(|hit| SearchCandidate {
                        provider: ProviderKind::Tmdb,
                        kind: EntityKind::Movie,
                        ext_id: hit.id.to_string(),
                        year: hit.release_date.as_deref().and_then(year_from_date),
                        title: hit.title,
                    })
                    .collect())
            }
            MediaType::Tv => {
                let year_param = year.map(|y| y.to_string());
                let mut params: Vec<(&str, &str)> = vec![("query", query)];
                if let Some(y) = year_param.as_deref() {
                    params.push(("first_air_date_year", y));
                }
                let result: TvSearchResponse = self.get_json("/search/tv", &params).await?;
                Ok(result
                    .results
                    .into_iter()
                    .map(|hit| SearchCandidate {
                        provider: ProviderKind::Tmdb,
                        kind: EntityKind::Series,
                        ext_id: hit.id.to_string(),
                        year: hit.first_air_date.as_deref().and_then(year_from_date),
                        title: hit.name,
                    })
                    .collect())
            }
            MediaType::Music => Ok(Vec::new()),
        }
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        match entity_ref.kind {
            EntityKind::Movie => {
                let details: MovieDetails = self
                    .get_json(&format!("/movie/{}", entity_ref.ext_id), &[])
                    .await?;
                Ok(ProviderEntity {
                    provider: ProviderKind::Tmdb,
                    kind: EntityKind::Movie,
                    ext_id: details.id.to_string(),
                    title_norm: normalize_title(&details.title),
                    year: details.release_date.as_deref().and_then(year_from_date),
                    metadata: serde_json::json!({ "runtime": details.runtime }),
                    title: details.title,
                    fetched_at: Utc::now(),
                    ttl_seconds: ttl_for_kind(EntityKind::Movie).as_secs() as i64,
                })
            }
            EntityKind::Series => {
                let details: TvDetails = self
                    .get_json(&format!("/tv/{}", entity_ref.ext_id), &[])
                    .await?;
                Ok(ProviderEntity {
                    provider: ProviderKind::Tmdb,
                    kind: EntityKind::Series,
                    ext_id: details.id.to_string(),
                    title_norm: normalize_title(&details.name),
                    year: details.first_air_date.as_deref().and_then(year_from_date),
                    metadata: serde_json::json!({ "seasons": details.number_of_seasons }),
                    title: details.name,
                    fetched_at: Utc::now(),
                    ttl_seconds: ttl_for_kind(EntityKind::Series).as_secs() as i64,
                })
            }
            _ => Err(ProviderError::NotFound),
        }
    }

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        if entity_ref.kind != EntityKind::Series {
            return Err(ProviderError::NotFound);
        }
        let details: TvDetails = self
            .get_json(&format!("/tv/{}", entity_ref.ext_id), &[])
            .await?;
        let mut episodes = Vec::new();
        for season in 1..=details.number_of_seasons {
            let listing: SeasonDetails = self
                .get_json(&format!("/tv/{}/season/{season}", entity_ref.ext_id), &[])
                .await?;
            for dto in listing.episodes {
                episodes.push(EpisodeRecord {
                    provider: ProviderKind::Tmdb,
                    series_id: entity_ref.ext_id.clone(),
                    season: dto.season_number,
                    episode: dto.episode_number,
                    title: dto.name,
                    air_date: dto
                        .air_date
                        .as_deref()
                        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()),
                    metadata: serde_json::Value::Null,
                });
            }
        }
        episodes.sort_by_key(|e| (e.season, e.episode));
        Ok(Children::Episodes(episodes))
    }
}
