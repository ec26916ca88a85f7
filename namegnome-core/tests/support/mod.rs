//! Shared fixtures: a canned in-memory metadata provider and pipeline
//! construction helpers.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use namegnome_config::Config;
use namegnome_core::Pipeline;
use namegnome_core::cache::CacheStore;
use namegnome_core::providers::{
    MetadataProvider, ProviderError, ProviderGateway, ProviderRegistry,
};
use namegnome_model::{
    Children, EntityKind, EpisodeRecord, MediaType, ProviderEntity, ProviderKind, ProviderRef,
    SearchCandidate,
};

/// Provider fed from fixtures instead of HTTP.
#[derive(Default)]
pub struct MockProvider {
    kind: Option<ProviderKind>,
    candidates: Vec<SearchCandidate>,
    episodes: BTreeMap<String, Vec<EpisodeRecord>>,
}

impl MockProvider {
    pub fn tvdb() -> Self {
        Self {
            kind: Some(ProviderKind::Tvdb),
            ..Self::default()
        }
    }

    pub fn tmdb() -> Self {
        Self {
            kind: Some(ProviderKind::Tmdb),
            ..Self::default()
        }
    }

    pub fn with_series(
        mut self,
        ext_id: &str,
        title: &str,
        year: Option<i32>,
        episodes: &[(u32, u32, &str)],
    ) -> Self {
        let provider = self.kind.expect("kind set");
        self.candidates.push(SearchCandidate {
            provider,
            kind: EntityKind::Series,
            ext_id: ext_id.to_string(),
            title: title.to_string(),
            year,
        });
        self.episodes.insert(
            ext_id.to_string(),
            episodes
                .iter()
                .map(|(season, episode, name)| EpisodeRecord {
                    provider,
                    series_id: ext_id.to_string(),
                    season: *season,
                    episode: *episode,
                    title: (*name).to_string(),
                    air_date: None,
                    metadata: serde_json::Value::Null,
                })
                .collect(),
        );
        self
    }

    pub fn with_movie(mut self, ext_id: &str, title: &str, year: Option<i32>) -> Self {
        let provider = self.kind.expect("kind set");
        self.candidates.push(SearchCandidate {
            provider,
            kind: EntityKind::Movie,
            ext_id: ext_id.to_string(),
            title: title.to_string(),
            year,
        });
        self
    }
}

#[async_trait]
impl MetadataProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind.expect("kind set")
    }

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        _year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let wanted_kind = match media_type {
            MediaType::Tv => EntityKind::Series,
            MediaType::Movie => EntityKind::Movie,
            MediaType::Music => EntityKind::Artist,
        };
        let query = query.to_lowercase();
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.kind == wanted_kind)
            .filter(|c| c.title.to_lowercase().contains(&query) || query.contains(&c.title.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError> {
        let candidate = self
            .candidates
            .iter()
            .find(|c| c.ext_id == entity_ref.ext_id && c.kind == entity_ref.kind)
            .ok_or(ProviderError::NotFound)?;
        Ok(ProviderEntity {
            provider: candidate.provider,
            kind: candidate.kind,
            ext_id: candidate.ext_id.clone(),
            title: candidate.title.clone(),
            title_norm: candidate.title.to_lowercase(),
            year: candidate.year,
            metadata: serde_json::Value::Null,
            fetched_at: Utc::now(),
            ttl_seconds: 3600,
        })
    }

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError> {
        match self.episodes.get(&entity_ref.ext_id) {
            Some(episodes) => Ok(Children::Episodes(episodes.clone())),
            None => Ok(Children::Episodes(Vec::new())),
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    // Keys present so online planning passes validation without network.
    config.providers.tvdb.api_key = Some("test-key".to_string());
    config.providers.tmdb.api_key = Some("test-key".to_string());
    config.llm.enabled = false;
    config
}

pub async fn pipeline_with_tv(provider: MockProvider) -> Pipeline {
    let config = Arc::new(test_config());
    let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
    let registry = ProviderRegistry::new(vec![Arc::new(provider)], Vec::new(), Vec::new());
    let gateway = Arc::new(ProviderGateway::new(registry, Arc::clone(&store), &config));
    Pipeline::new(store, gateway, config)
}

pub async fn pipeline_with_movie(provider: MockProvider) -> Pipeline {
    let config = Arc::new(test_config());
    let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
    let registry = ProviderRegistry::new(Vec::new(), vec![Arc::new(provider)], Vec::new());
    let gateway = Arc::new(ProviderGateway::new(registry, Arc::clone(&store), &config));
    Pipeline::new(store, gateway, config)
}
