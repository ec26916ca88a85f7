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

const DEFAULT_BASE_URL: &str = "https://api.tvmaze.com";

/// TVmaze fallback for TV search: keyless, generous rate limits, decent
/// episode data.
pub struct TvmazeProvider {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for TvmazeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvmazeProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    show: ShowDto,
}

#[derive(Debug, Deserialize)]
struct ShowDto {
    id: u64,
    name: String,
    premiered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeDto {
    season: u32,
    number: Option<u32>,
    name: String,
    airdate: Option<String>,
}

impl TvmazeProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl MetadataProvider for TvmazeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tvmaze
    }

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        _year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        if media_type != MediaType::Tv {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(format!("{}/search/shows", self.base_url))
            .query(&[("q", query)])
            .send()
            .await?;
        let hits: Vec<SearchHit> = json_or_error(response).await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchCandidate {
                provider: ProviderKind::Tvmaze,
                kind: EntityKind::Series,
                ext_id: hit.show.id.to_string(),
                year: hit.show.premiered.as_deref().and_then(year_from_date),
                title: hit.show.name,
            })
            .collect())
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        let response = self
            .client
            .get(format!("{}/shows/{}", self.base_url, entity_ref.ext_id))
            .send()
            .await?;
        let show: ShowDto = json_or_error(response).await?;
        Ok(ProviderEntity {
            provider: ProviderKind::Tvmaze,
            kind: EntityKind::Series,
            ext_id: show.id.to_string(),
            title_norm: normalize_title(&show.name),
            year: show.premiered.as_deref().and_then(year_from_date),
            metadata: serde_json::Value::Null,
            title: show.name,
            fetched_at: Utc::now(),
            ttl_seconds: ttl_for_kind(EntityKind::Series).as_secs() as i64,
        })
    }

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/shows/{}/episodes",
                self.base_url, entity_ref.ext_id
            ))
            .send()
            .await?;
        let dtos: Vec<EpisodeDto> = json_or_error(response).await?;
        let mut episodes: Vec<EpisodeRecord> = dtos
            .into_iter()
            .filter_map(|dto| {
                Some(EpisodeRecord {
                    provider: ProviderKind::Tvmaze,
                    series_id: entity_ref.ext_id.clone(),
                    season: dto.season,
                    episode: dto.number?,
                    title: dto.name,
                    air_date: dto
                        .airdate
                        .as_deref()
                        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()),
                    metadata: serde_json::Value::Null,
                })
            })
            .collect();
        episodes.sort_by_key(|e| (e.season, e.episode));
        Ok(Children::Episodes(episodes))
    }
}
