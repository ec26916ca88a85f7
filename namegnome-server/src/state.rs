use std::sync::Arc;

use namegnome_config::Config;
use namegnome_core::cache::CacheStore;
use namegnome_core::jobs::JobRegistry;
use namegnome_core::pipeline::Pipeline;
use namegnome_core::providers::{ProviderGateway, ProviderRegistry};

/// Shared server state: the pipeline plus the in-process job registry.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub jobs: Arc<JobRegistry>,
    pub config: Arc<Config>,
    pub store: Arc<CacheStore>,
}

impl AppState {
    pub async fn build(config: Config) -> namegnome_core::Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(CacheStore::open(&config.cache_path).await?);
        let registry = ProviderRegistry::from_config(&config, Arc::clone(&store));
        let gateway = Arc::new(ProviderGateway::new(registry, Arc::clone(&store), &config));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&config),
        ));
        Ok(Self {
            pipeline,
            jobs: Arc::new(JobRegistry::new()),
            config,
            store,
        })
    }

    /// Test constructor over an in-memory cache.
    pub async fn build_in_memory(config: Config) -> namegnome_core::Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(CacheStore::open_in_memory().await?);
        let registry = ProviderRegistry::from_config(&config, Arc::clone(&store));
        let gateway = Arc::new(ProviderGateway::new(registry, Arc::clone(&store), &config));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&config),
        ));
        Ok(Self {
            pipeline,
            jobs: Arc::new(JobRegistry::new()),
            config,
            store,
        })
    }
}
