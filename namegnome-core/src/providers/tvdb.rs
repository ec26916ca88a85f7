use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use namegnome_config::ProviderSettings;
use namegnome_model::{
    Children, EntityKind, EpisodeRecord, MediaType, ProviderEntity, ProviderKind, ProviderRef,
    SearchCandidate,
};

use crate::cache::CacheStore;
use crate::normalize::normalize_title;
use crate::providers::http::{json_or_error, year_from_date};
use crate::providers::{MetadataProvider, ProviderError, ttl_for_kind};

const DEFAULT_BASE_URL: &str = "https://api4.thetvdb.com/v4";
const AUTH_KV_KEY: &str = "auth:tvdb";
const AUTH_TTL: Duration = Duration::from_secs(24 * 3600);

/// TVDB v4 client. The v4 API wants a login POST exchanging the API key for
/// a bearer token; the token is cached in the kv table for 24 hours.
pub struct TvdbProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    store: Arc<CacheStore>,
}

impl std::fmt::Debug for TvdbProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvdbProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    tvdb_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    data: SeriesData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesData {
    id: u64,
    name: String,
    year: Option<String>,
    first_aired: Option<String>,
    #[serde(default)]
    status: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EpisodesResponse {
    data: EpisodesData,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Deserialize)]
struct EpisodesData {
    #[serde(default)]
    episodes: Vec<EpisodeDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeDto {
    season_number: Option<u32>,
    number: Option<u32>,
    name: Option<String>,
    aired: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    next: Option<String>,
}

impl TvdbProvider {
    pub fn new(settings: &ProviderSettings, store: Arc<CacheStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: settings.api_key.clone(),
            store,
        }
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        if let Ok(Some(cached)) = self.store.kv_get(AUTH_KV_KEY).await {
            if !cached.stale {
                return Ok(cached.value);
            }
        }
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Auth("TVDB_API_KEY not set".to_string()))?;

        debug!("logging in to tvdb");
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&serde_json::json!({ "apikey": api_key }))
            .send()
            .await?;
        let login: LoginResponse = json_or_error(response).await?;
        let _ = self
            .store
            .kv_put(AUTH_KV_KEY, &login.data.token, Some(AUTH_TTL))
            .await;
        Ok(login.data.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        json_or_error(response).await
    }

    fn series_ext_id(hit: &SearchHit) -> Option<String> {
        if let Some(id) = &hit.tvdb_id {
            return Some(id.clone());
        }
        hit.id
            .as_ref()
            .map(|raw| raw.strip_prefix("series-").unwrap_or(raw).to_string())
    }
}

#[async_trait]
impl MetadataProvider for TvdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tvdb
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
        let result: SearchResponse = self
            .get_json("/search", &[("query", query), ("type", "series")])
            .await?;
        Ok(result
            .data
            .iter()
            .filter_map(|hit| {
                let ext_id = Self::series_ext_id(hit)?;
                Some(SearchCandidate {
                    provider: ProviderKind::Tvdb,
                    kind: EntityKind::Series,
                    ext_id,
                    title: hit.name.clone()?,
                    year: hit.year.as_deref().and_then(year_from_date),
                })
            })
            .collect())
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        let series: SeriesResponse = self
            .get_json(&format!("/series/{}", entity_ref.ext_id), &[])
            .await?;
        let year = series
            .data
            .year
            .as_deref()
            .and_then(year_from_date)
            .or_else(|| series.data.first_aired.as_deref().and_then(year_from_date));
        Ok(ProviderEntity {
            provider: ProviderKind::Tvdb,
            kind: EntityKind::Series,
            ext_id: series.data.id.to_string(),
            title_norm: normalize_title(&series.data.name),
            title: series.data.name,
            year,
            metadata: serde_json::json!({ "status": series.data.status }),
            fetched_at: Utc::now(),
            ttl_seconds: ttl_for_kind(EntityKind::Series).as_secs() as i64,
        })
    }

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        let mut episodes = Vec::new();
        let mut page = 0u32;
        loop {
            let page_param = page.to_string();
            let response: EpisodesResponse = self
                .get_json(
                    &format!("/series/{}/episodes/default", entity_ref.ext_id),
                    &[("page", page_param.as_str())],
                )
                .await?;
            for dto in &response.data.episodes {
                let (Some(season), Some(number), Some(name)) =
                    (dto.season_number, dto.number, dto.name.clone())
                else {
                    continue;
                };
                episodes.push(EpisodeRecord {
                    provider: ProviderKind::Tvdb,
                    series_id: entity_ref.ext_id.clone(),
                    season,
                    episode: number,
                    title: name,
                    air_date: dto
                        .aired
                        .as_deref()
                        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()),
                    metadata: serde_json::Value::Null,
                });
            }
            if response.links.next.is_none() || response.data.episodes.is_empty() {
                break;
            }
            page += 1;
        }
        episodes.sort_by_key(|e| (e.season, e.episode));
        Ok(Children::Episodes(episodes))
    }
}
