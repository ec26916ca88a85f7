use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use namegnome_config::ProviderSettings;
use namegnome_model::{
    Children, EntityKind, MediaType, ProviderEntity, ProviderKind, ProviderRef, SearchCandidate,
};

use crate::normalize::normalize_title;
use crate::providers::http::{json_or_error, year_from_date};
use crate::providers::{MetadataProvider, ProviderError, ttl_for_kind};

const DEFAULT_BASE_URL: &str = "https://www.omdbapi.com";

/// OMDb movie-search fallback. Registered only when an API key is present.
pub struct OmdbProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OmdbProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OmdbProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Search", default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: String,
}

impl OmdbProvider {
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
            .ok_or_else(|| ProviderError::Auth("OMDB_API_KEY not set".to_string()))
    }
}

#[async_trait]
impl MetadataProvider for OmdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Omdb
    }

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        if media_type != MediaType::Movie {
            return Ok(Vec::new());
        }
        let key = self.key()?;
        let year_param = year.map(|y| y.to_string());
        let mut params: Vec<(&str, &str)> =
            vec![("apikey", key), ("s", query), ("type", "movie")];
        if let Some(y) = year_param.as_deref() {
            params.push(("y", y));
        }
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&params)
            .send()
            .await?;
        let result: SearchResponse = json_or_error(response).await?;
        Ok(result
            .search
            .into_iter()
            .map(|hit| SearchCandidate {
                provider: ProviderKind::Omdb,
                kind: EntityKind::Movie,
                ext_id: hit.imdb_id,
                year: hit.year.as_deref().and_then(year_from_date),
                title: hit.title,
            })
            .collect())
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        let key = self.key()?;
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("apikey", key), ("i", entity_ref.ext_id.as_str())])
            .send()
            .await?;
        let detail: DetailResponse = json_or_error(response).await?;
        Ok(ProviderEntity {
            provider: ProviderKind::Omdb,
            kind: EntityKind::Movie,
            ext_id: detail.imdb_id,
            title_norm: normalize_title(&detail.title),
            year: detail.year.as_deref().and_then(year_from_date),
            metadata: serde_json::Value::Null,
            title: detail.title,
            fetched_at: Utc::now(),
            ttl_seconds: ttl_for_kind(EntityKind::Movie).as_secs() as i64,
        })
    }

    async fn list_children(&self, _entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        // Movies have no children; OMDb never serves series listings here.
        Err(ProviderError::NotFound)
    }
}
