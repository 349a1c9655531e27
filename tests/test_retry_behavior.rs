//! Retry behaviour of the media path against a live mock upstream

use offline_relay::{
    HttpFetcher, InterceptRequest, MemoryStore, OfflineRelay, RelayConfig, RouteRule, Store,
};
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.retry.backoff_base_ms = 5;
    config.routing.media = RouteRule {
        hosts: vec!["127.0.0.1".to_string()],
        path_segments: vec!["/audio/".to_string()],
        path_suffixes: vec![".mp3".to_string()],
    };
    config
}

fn relay(store: Arc<MemoryStore>) -> OfflineRelay {
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap());
    OfflineRelay::new(config(), store, fetcher)
}

#[tokio::test]
async fn test_two_transient_failures_then_success_is_cached() {
    let mock_server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    Mock::given(method("GET"))
        .and(path("/audio/song.mp3"))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "audio/mpeg")
                    .set_body_bytes(vec![9u8; 1000])
            }
        })
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let relay = relay(store.clone());
    let url = format!("{}/audio/song.mp3", mock_server.uri());

    let response = relay
        .intercept(&InterceptRequest::get(&url).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.len(), 1000);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(store.len("relay-media-v1").await.unwrap(), 1);

    // Second play comes from the store
    let again = relay
        .intercept(&InterceptRequest::get(&url).unwrap())
        .await
        .unwrap();
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    let stats = relay.metrics().get_stats();
    assert_eq!(stats.retried_fetches, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn test_not_found_is_a_single_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/audio/missing.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let relay = relay(store.clone());
    let url = format!("{}/audio/missing.mp3", mock_server.uri());

    let response = relay
        .intercept(&InterceptRequest::get(&url).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(store.len("relay-media-v1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_persistent_overload_exhausts_and_goes_offline() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/audio/busy.mp3"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let relay = relay(Arc::new(MemoryStore::new()));
    let url = format!("{}/audio/busy.mp3", mock_server.uri());

    let response = relay
        .intercept(&InterceptRequest::get(&url).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], true);
    assert_eq!(relay.metrics().get_stats().failed_fetches, 1);
}

#[tokio::test]
async fn test_range_request_never_reaches_upstream() {
    let mock_server = MockServer::start().await;

    // A forwarded Range header would hit this mock first
    Mock::given(method("GET"))
        .and(path("/audio/seek.mp3"))
        .and(header_exists("range"))
        .respond_with(ResponseTemplate::new(400))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/audio/seek.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 300]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let relay = relay(Arc::new(MemoryStore::new()));
    let url = format!("{}/audio/seek.mp3", mock_server.uri());
    let request = InterceptRequest::get(&url)
        .unwrap()
        .with_header(http::header::RANGE, "bytes=200-");

    let response = relay.intercept(&request).await.unwrap();
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.body.len(), 100);
    assert_eq!(response.header("content-range"), Some("bytes 200-299/300"));
}
