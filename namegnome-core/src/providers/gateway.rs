use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use namegnome_config::{Config, RetryConfig};
use namegnome_model::{
    Children, EntityKind, MediaType, ProviderEntity, ProviderKind, ProviderRef, SearchCandidate,
};

use crate::cache::CacheStore;
use crate::error::{CoreError, Result};
use crate::normalize::normalize_title;
use crate::providers::rate_limit::TokenBucket;
use crate::providers::{MetadataProvider, ProviderError, ProviderRegistry};

/// Search result blobs age out after a week.
pub const SEARCH_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const EPISODES_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 3600);

/// Entity TTLs: series/movies/albums 30 days.
pub fn ttl_for_kind(kind: EntityKind) -> Duration {
    match kind {
        EntityKind::Series | EntityKind::Movie | EntityKind::Artist | EntityKind::Album => {
            THIRTY_DAYS
        }
    }
}

fn children_ttl(kind: EntityKind) -> Duration {
    match kind {
        EntityKind::Series => EPISODES_TTL,
        _ => THIRTY_DAYS,
    }
}

/// Exponential backoff with jitter factor applied by the caller:
/// `base * 2^attempt * jitter`, `jitter ∈ [0.75, 1.25]`.
fn backoff_delay(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let exp = base.as_secs_f64() * f64::from(1u32 << attempt.min(16));
    Duration::from_secs_f64(exp * jitter)
}

/// Uniform façade over the provider registry: read-through caching via the
/// store, per-provider token buckets, retry with backoff, and search-only
/// fallback chains. Offline mode serves exclusively from cache.
pub struct ProviderGateway {
    registry: ProviderRegistry,
    store: Arc<CacheStore>,
    buckets: HashMap<ProviderKind, TokenBucket>,
    retry: HashMap<ProviderKind, RetryConfig>,
    provider_timeout: Duration,
    search_budget: Duration,
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("registry", &self.registry)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderGateway {
    pub fn new(registry: ProviderRegistry, store: Arc<CacheStore>, config: &Config) -> Self {
        let mut buckets = HashMap::new();
        let mut retry = HashMap::new();
        let settings = [
            (ProviderKind::Tvdb, &config.providers.tvdb),
            (ProviderKind::Tmdb, &config.providers.tmdb),
            (ProviderKind::Musicbrainz, &config.providers.musicbrainz),
            (ProviderKind::Omdb, &config.providers.omdb),
            (ProviderKind::Tvmaze, &config.providers.tvmaze),
            (ProviderKind::Fanarttv, &config.providers.fanarttv),
        ];
        for (kind, provider) in settings {
            buckets.insert(
                kind,
                TokenBucket::new(provider.rate.capacity, provider.rate.refill_per_sec),
            );
            retry.insert(kind, provider.retry);
        }
        Self {
            registry,
            store,
            buckets,
            retry,
            provider_timeout: config.timeouts.provider_call(),
            search_budget: config.timeouts.search_budget(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Search with read-through caching and fallback. Fallbacks are tried
    /// when the primary exhausts retries or returns poor data (no hits).
    pub async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
        offline: bool,
    ) -> Result<Vec<SearchCandidate>> {
        let cache_key = format!(
            "search:{}:{}:{}",
            media_type,
            normalize_title(query),
            year.map_or_else(|| "-".to_string(), |y| y.to_string())
        );

        let cached = self
            .store
            .get_cache_json::<Vec<SearchCandidate>>(&cache_key)
            .await?;
        if let Some(hit) = &cached {
            if !hit.stale {
                return Ok(hit.value.clone());
            }
        }
        if offline {
            return match cached {
                Some(hit) => Ok(hit.value),
                None => Err(self.offline_miss(media_type)),
            };
        }

        // Retries are per provider; the whole chain also runs under a total
        // wall budget.
        let mut last_error: Option<ProviderError> = None;
        let chain = async {
            for provider in self.registry.chain(media_type) {
                match self
                    .with_retry(provider.kind(), || {
                        let provider = Arc::clone(provider);
                        let query = query.to_string();
                        async move { provider.search(media_type, &query, year).await }
                    })
                    .await
                {
                    Ok(candidates) if !candidates.is_empty() => {
                        return Ok::<_, CoreError>(Some(candidates));
                    }
                    Ok(_) => {
                        // Poor data: fall through to the next provider.
                        debug!(provider = %provider.kind(), query, "empty search result, trying fallback");
                    }
                    Err(err) => {
                        warn!(provider = %provider.kind(), error = %err, "search failed");
                        last_error = Some(err);
                    }
                }
            }
            Ok(None)
        };
        let outcome = tokio::time::timeout(self.search_budget, chain).await;
        match outcome {
            Ok(Ok(Some(candidates))) => {
                self.store
                    .put_cache_json(&cache_key, &candidates, SEARCH_TTL)
                    .await?;
                return Ok(candidates);
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                warn!(%media_type, "search wall budget exhausted");
                last_error = Some(ProviderError::Timeout);
            }
        }

        // Every provider came back empty or broken; a stale hit beats nothing.
        if let Some(hit) = cached {
            return Ok(hit.value);
        }
        match last_error {
            Some(err) => Err(self.unavailable(media_type, err)),
            None => Ok(Vec::new()),
        }
    }

    /// Detail fetch. No fallback: an `ext_id` is only meaningful to the
    /// provider that minted it.
    pub async fn fetch(&self, entity_ref: &ProviderRef, offline: bool) -> Result<ProviderEntity> {
        let cached = self.store.get_entity(entity_ref).await?;
        if let Some(hit) = &cached {
            if !hit.stale {
                return Ok(hit.value.clone());
            }
        }
        if offline {
            return match cached {
                Some(hit) => Ok(hit.value),
                None => Err(CoreError::ProviderUnavailable {
                    provider: Some(entity_ref.provider),
                    offline: true,
                    message: format!("{entity_ref} not cached"),
                }),
            };
        }

        let Some(provider) = self.registry.by_kind(entity_ref.provider) else {
            return Err(CoreError::ProviderUnavailable {
                provider: Some(entity_ref.provider),
                offline: false,
                message: format!("provider {} not configured", entity_ref.provider),
            });
        };

        match self
            .with_retry(entity_ref.provider, || {
                let provider = Arc::clone(provider);
                let entity_ref = entity_ref.clone();
                async move { provider.fetch(&entity_ref).await }
            })
            .await
        {
            Ok(entity) => {
                self.store.put_entity(&entity).await?;
                Ok(entity)
            }
            Err(err) if err.is_transient() => match cached {
                // Stale-while-revalidate: serve the stale row when refresh fails.
                Some(hit) => Ok(hit.value),
                None => Err(CoreError::ProviderUnavailable {
                    provider: Some(entity_ref.provider),
                    offline: false,
                    message: err.to_string(),
                }),
            },
            Err(err) => Err(CoreError::ProviderUnavailable {
                provider: Some(entity_ref.provider),
                offline: false,
                message: err.to_string(),
            }),
        }
    }

    /// Episode or track listing, cached in the episodes/tracks tables with a
    /// freshness marker blob.
    pub async fn list_children(&self, entity_ref: &ProviderRef, offline: bool) -> Result<Children> {
        let marker_key = format!(
            "children:{}:{}:{}",
            entity_ref.provider,
            entity_ref.kind.as_str(),
            entity_ref.ext_id
        );
        let marker = self.store.get_cache_blob(&marker_key).await?;
        let fresh = marker.as_ref().is_some_and(|m| !m.stale);

        if fresh || offline {
            let cached = self.children_from_tables(entity_ref).await?;
            if let Some(children) = cached {
                return Ok(children);
            }
            if offline {
                return Err(CoreError::ProviderUnavailable {
                    provider: Some(entity_ref.provider),
                    offline: true,
                    message: format!("children of {entity_ref} not cached"),
                });
            }
        }

        let Some(provider) = self.registry.by_kind(entity_ref.provider) else {
            return Err(CoreError::ProviderUnavailable {
                provider: Some(entity_ref.provider),
                offline: false,
                message: format!("provider {} not configured", entity_ref.provider),
            });
        };

        match self
            .with_retry(entity_ref.provider, || {
                let provider = Arc::clone(provider);
                let entity_ref = entity_ref.clone();
                async move { provider.list_children(&entity_ref).await }
            })
            .await
        {
            Ok(children) => {
                match &children {
                    Children::Episodes(episodes) => self.store.put_episodes(episodes).await?,
                    Children::Tracks(tracks) => self.store.put_tracks(tracks).await?,
                }
                self.store
                    .put_cache_blob(&marker_key, b"1", children_ttl(entity_ref.kind))
                    .await?;
                Ok(children)
            }
            Err(err) => {
                // Stale rows beat a hard failure.
                if err.is_transient() {
                    if let Some(children) = self.children_from_tables(entity_ref).await? {
                        return Ok(children);
                    }
                }
                Err(CoreError::ProviderUnavailable {
                    provider: Some(entity_ref.provider),
                    offline: false,
                    message: err.to_string(),
                })
            }
        }
    }

    /// Scoped child search (albums of an artist), cached like any search.
    pub async fn search_children(
        &self,
        parent: &ProviderRef,
        offline: bool,
    ) -> Result<Vec<SearchCandidate>> {
        let cache_key = format!(
            "child_search:{}:{}:{}",
            parent.provider,
            parent.kind.as_str(),
            parent.ext_id
        );
        let cached = self
            .store
            .get_cache_json::<Vec<SearchCandidate>>(&cache_key)
            .await?;
        if let Some(hit) = &cached {
            if !hit.stale {
                return Ok(hit.value.clone());
            }
        }
        if offline {
            return match cached {
                Some(hit) => Ok(hit.value),
                None => Err(CoreError::ProviderUnavailable {
                    provider: Some(parent.provider),
                    offline: true,
                    message: format!("children of {parent} not cached"),
                }),
            };
        }
        let Some(provider) = self.registry.by_kind(parent.provider) else {
            return Err(CoreError::ProviderUnavailable {
                provider: Some(parent.provider),
                offline: false,
                message: format!("provider {} not configured", parent.provider),
            });
        };
        match self
            .with_retry(parent.provider, || {
                let provider = Arc::clone(provider);
                let parent = parent.clone();
                async move { provider.search_children(&parent).await }
            })
            .await
        {
            Ok(candidates) => {
                self.store
                    .put_cache_json(&cache_key, &candidates, SEARCH_TTL)
                    .await?;
                Ok(candidates)
            }
            Err(err) => match cached {
                Some(hit) if err.is_transient() => Ok(hit.value),
                _ => Err(CoreError::ProviderUnavailable {
                    provider: Some(parent.provider),
                    offline: false,
                    message: err.to_string(),
                }),
            },
        }
    }

    async fn children_from_tables(&self, entity_ref: &ProviderRef) -> Result<Option<Children>> {
        match entity_ref.kind {
            EntityKind::Series => {
                let episodes = self
                    .store
                    .get_episodes(entity_ref.provider, &entity_ref.ext_id, None)
                    .await?;
                Ok((!episodes.is_empty()).then_some(Children::Episodes(episodes)))
            }
            EntityKind::Album => {
                let tracks = self
                    .store
                    .get_tracks(entity_ref.provider, &entity_ref.ext_id)
                    .await?;
                Ok((!tracks.is_empty()).then_some(Children::Tracks(tracks)))
            }
            _ => Ok(None),
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        kind: ProviderKind,
        mut op: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let retry = self.retry.get(&kind).copied().unwrap_or_default();
        let mut attempt = 0u32;
        loop {
            if let Some(bucket) = self.buckets.get(&kind) {
                bucket.acquire().await;
            }
            let outcome = match tokio::time::timeout(self.provider_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < retry.max_attempts => {
                    let delay = match err.retry_after() {
                        // 429 with Retry-After wins over our own schedule.
                        Some(seconds) => Duration::from_secs(seconds),
                        None => {
                            let jitter = rand::rng().random_range(0.75..=1.25);
                            backoff_delay(retry.base(), attempt, jitter)
                        }
                    };
                    debug!(provider = %kind, attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn offline_miss(&self, media_type: MediaType) -> CoreError {
        let provider = self.registry.primary(media_type).map(|p| p.kind());
        CoreError::ProviderUnavailable {
            provider,
            offline: true,
            message: "cache miss in offline mode".to_string(),
        }
    }

    fn unavailable(&self, media_type: MediaType, err: ProviderError) -> CoreError {
        let provider = self.registry.primary(media_type).map(|p| p.kind());
        CoreError::ProviderUnavailable {
            provider,
            offline: false,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 0, 1.0), Duration::from_millis(250));
        assert_eq!(backoff_delay(base, 1, 1.0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3, 1.0), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_jitter_stays_within_quarter() {
        let base = Duration::from_millis(100);
        let low = backoff_delay(base, 0, 0.75);
        let high = backoff_delay(base, 0, 1.25);
        assert_eq!(low, Duration::from_millis(75));
        assert_eq!(high, Duration::from_millis(125));
    }

    #[test]
    fn ttls_match_policy() {
        assert_eq!(ttl_for_kind(EntityKind::Series), THIRTY_DAYS);
        assert_eq!(children_ttl(EntityKind::Series), EPISODES_TTL);
        assert_eq!(children_ttl(EntityKind::Album), THIRTY_DAYS);
    }
}
