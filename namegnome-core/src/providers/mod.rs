//! Metadata providers and the gateway that fronts them.
//!
//! Each provider implements [`MetadataProvider`]; the [`ProviderGateway`]
//! adds caching, rate limiting, retry/backoff and fallback on top and is the
//! only thing the mapper talks to.

mod gateway;
mod http;
mod musicbrainz;
mod omdb;
mod rate_limit;
mod tmdb;
mod tvdb;
mod tvmaze;

pub use gateway::{ProviderGateway, SEARCH_TTL, ttl_for_kind};
pub use musicbrainz::MusicBrainzProvider;
pub use omdb::OmdbProvider;
pub use rate_limit::TokenBucket;
pub use tmdb::TmdbProvider;
pub use tvdb::TvdbProvider;
pub use tvmaze::TvmazeProvider;

use std::sync::Arc;

use async_trait::async_trait;

use namegnome_config::Config;
use namegnome_model::{
    Children, MediaType, ProviderEntity, ProviderKind, ProviderRef, SearchCandidate,
};

use crate::cache::CacheStore;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider returned status {code}")]
    Status { code: u16, retry_after: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found")]
    NotFound,

    #[error("poor data: {0}")]
    PoorData(String),

    #[error("call timed out")]
    Timeout,
}

impl ProviderError {
    /// Transient errors are retried with backoff; the rest surface at once.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout => true,
            ProviderError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Uniform provider façade: search, detail fetch, children listing.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError>;

    async fn fetch(&self, entity_ref: &ProviderRef) -> Result<ProviderEntity, ProviderError>;

    async fn list_children(&self, entity_ref: &ProviderRef) -> Result<Children, ProviderError>;

    /// Scoped search under a parent entity (albums of an artist). Providers
    /// without a parent/child catalog return nothing.
    async fn search_children(
        &self,
        _parent: &ProviderRef,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Maps each media type to a primary provider plus an ordered fallback chain.
pub struct ProviderRegistry {
    tv: Vec<Arc<dyn MetadataProvider>>,
    movie: Vec<Arc<dyn MetadataProvider>>,
    music: Vec<Arc<dyn MetadataProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("tv", &self.tv.len())
            .field("movie", &self.movie.len())
            .field("music", &self.music.len())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(
        tv: Vec<Arc<dyn MetadataProvider>>,
        movie: Vec<Arc<dyn MetadataProvider>>,
        music: Vec<Arc<dyn MetadataProvider>>,
    ) -> Self {
        Self { tv, movie, music }
    }

    /// Wire up the default chains: TVDB→TVmaze for TV, TMDB→OMDb for movies,
    /// MusicBrainz for music. Keyless fallbacks are always present; keyed
    /// ones only when a key is configured.
    pub fn from_config(config: &Config, store: Arc<CacheStore>) -> Self {
        let mut tv: Vec<Arc<dyn MetadataProvider>> = vec![Arc::new(TvdbProvider::new(
            &config.providers.tvdb,
            Arc::clone(&store),
        ))];
        tv.push(Arc::new(TvmazeProvider::new(&config.providers.tvmaze)));

        let mut movie: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(TmdbProvider::new(&config.providers.tmdb))];
        if config.providers.omdb.api_key.is_some() {
            movie.push(Arc::new(OmdbProvider::new(&config.providers.omdb)));
        }

        let music: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(MusicBrainzProvider::new(&config.providers.musicbrainz))];

        Self::new(tv, movie, music)
    }

    pub fn chain(&self, media_type: MediaType) -> &[Arc<dyn MetadataProvider>] {
        match media_type {
            MediaType::Tv => &self.tv,
            MediaType::Movie => &self.movie,
            MediaType::Music => &self.music,
        }
    }

    pub fn primary(&self, media_type: MediaType) -> Option<&Arc<dyn MetadataProvider>> {
        self.chain(media_type).first()
    }

    pub fn by_kind(&self, kind: ProviderKind) -> Option<&Arc<dyn MetadataProvider>> {
        self.tv
            .iter()
            .chain(self.movie.iter())
            .chain(self.music.iter())
            .find(|provider| provider.kind() == kind)
    }

    pub fn all_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self
            .tv
            .iter()
            .chain(self.movie.iter())
            .chain(self.music.iter())
            .map(|provider| provider.kind())
            .collect();
        kinds.dedup();
        kinds
    }
}
