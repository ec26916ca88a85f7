//! Gateway behaviour over real HTTP (wiremock): retry with backoff,
//! permanent-error passthrough, read-through caching and offline mode.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use namegnome_config::Config;
use namegnome_core::CoreError;
use namegnome_core::cache::CacheStore;
use namegnome_core::providers::{
    ProviderGateway, ProviderRegistry, TvmazeProvider,
};
use namegnome_model::MediaType;

fn show_body() -> serde_json::Value {
    serde_json::json!([
        {"show": {"id": 2075, "name": "Danger Mouse", "premiered": "2015-09-28"}}
    ])
}

async fn gateway_for(server: &MockServer) -> (ProviderGateway, Arc<CacheStore>) {
    let mut config = Config::default();
    config.providers.tvmaze.base_url = Some(server.uri());
    // Fast tests: short backoff, generous bucket.
    config.providers.tvmaze.retry.max_attempts = 3;
    config.providers.tvmaze.retry.base_ms = 1;
    config.providers.tvmaze.rate.capacity = 100;
    config.providers.tvmaze.rate.refill_per_sec = 1000.0;

    let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
    let provider = TvmazeProvider::new(&config.providers.tvmaze);
    let registry = ProviderRegistry::new(vec![Arc::new(provider)], Vec::new(), Vec::new());
    (
        ProviderGateway::new(registry, Arc::clone(&store), &config),
        store,
    )
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/shows"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/shows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(show_body()))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _store) = gateway_for(&server).await;
    let candidates = gateway
        .search(MediaType::Tv, "Danger Mouse", None, false)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].title, "Danger Mouse");
    assert_eq!(candidates[0].year, Some(2015));
}

#[tokio::test]
async fn permanent_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shows/99"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _store) = gateway_for(&server).await;
    let entity_ref = namegnome_model::ProviderRef::new(
        namegnome_model::ProviderKind::Tvmaze,
        namegnome_model::EntityKind::Series,
        "99",
    );
    let err = gateway.fetch(&entity_ref, false).await.unwrap_err();
    assert!(matches!(err, CoreError::ProviderUnavailable { offline: false, .. }));
}

#[tokio::test]
async fn search_results_are_served_from_cache_on_repeat() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/shows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(show_body()))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _store) = gateway_for(&server).await;
    let first = gateway
        .search(MediaType::Tv, "Danger Mouse", None, false)
        .await
        .unwrap();
    let second = gateway
        .search(MediaType::Tv, "Danger Mouse", None, false)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn offline_mode_never_touches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/shows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(show_body()))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _store) = gateway_for(&server).await;

    // Cold offline: miss surfaces as offline unavailability.
    let err = gateway
        .search(MediaType::Tv, "Danger Mouse", None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ProviderUnavailable { offline: true, .. }));

    // Warm the cache online, then the same search works offline.
    gateway
        .search(MediaType::Tv, "Danger Mouse", None, false)
        .await
        .unwrap();
    let candidates = gateway
        .search(MediaType::Tv, "Danger Mouse", None, true)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
}

#[tokio::test]
async fn episode_listings_land_in_the_episodes_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shows/2075/episodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"season": 1, "number": 1, "name": "Danger Mouse Begins Again", "airdate": "2015-09-28"},
            {"season": 1, "number": 2, "name": "Danger at C Level", "airdate": "2015-09-28"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, store) = gateway_for(&server).await;
    let entity_ref = namegnome_model::ProviderRef::new(
        namegnome_model::ProviderKind::Tvmaze,
        namegnome_model::EntityKind::Series,
        "2075",
    );
    let children = gateway.list_children(&entity_ref, false).await.unwrap();
    let namegnome_model::Children::Episodes(episodes) = children else {
        panic!("expected episodes");
    };
    assert_eq!(episodes.len(), 2);

    // Rows are durable: a second listing is served without HTTP.
    let again = gateway.list_children(&entity_ref, false).await.unwrap();
    assert!(!again.is_empty());
    let rows = store
        .get_episodes(namegnome_model::ProviderKind::Tvmaze, "2075", Some(1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].title, "Danger Mouse Begins Again");
}
