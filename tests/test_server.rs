//! Tests for the HTTP front end: forward-proxy interception and the control endpoint

use offline_relay::server::CONTROL_PATH;
use offline_relay::{OfflineRelay, RelayConfig, RelayServer};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_relay() -> SocketAddr {
    let mut config = RelayConfig::default();
    config.retry.backoff_base_ms = 5;
    config.upstream_timeout_secs = 5;

    let relay = OfflineRelay::from_config(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(RelayServer::serve_on(relay, listener));
    addr
}

fn control_url(addr: SocketAddr) -> String {
    format!("http://{}{}", addr, CONTROL_PATH)
}

#[tokio::test]
async fn test_report_size_over_http() {
    let addr = start_relay().await;

    let response = reqwest::Client::new()
        .post(control_url(addr))
        .body(r#"{"type":"REPORT_SIZE"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value =
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["mediaCount"], 0);
    assert_eq!(body["imageCount"], 0);
    assert_eq!(body["mediaLimit"], 50);
    assert_eq!(body["imageLimit"], 100);
}

#[tokio::test]
async fn test_clear_namespace_is_accepted() {
    let addr = start_relay().await;

    let response = reqwest::Client::new()
        .post(control_url(addr))
        .body(r#"{"type":"CLEAR_NAMESPACE","kind":"image"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 202);
    let body: serde_json::Value =
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["accepted"], true);
}

#[tokio::test]
async fn test_unknown_control_message_is_rejected() {
    let addr = start_relay().await;
    let client = reqwest::Client::new();

    let unknown = client
        .post(control_url(addr))
        .body(r#"{"type":"SELF_DESTRUCT"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 400);

    let bad_url = client
        .post(control_url(addr))
        .body(r#"{"type":"CACHE_MEDIA","url":"not a url"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(bad_url.status(), 400);

    let wrong_method = client.get(control_url(addr)).send().await.unwrap();
    assert_eq!(wrong_method.status(), 405);
}

#[tokio::test]
async fn test_proxied_static_asset_is_cached() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>app</html>"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let addr = start_relay().await;
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", addr)).unwrap())
        .build()
        .unwrap();

    let url = format!("{}/index.html", upstream.uri());
    for _ in 0..2 {
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "<html>app</html>");
    }
}

#[tokio::test]
async fn test_proxied_post_is_forwarded_with_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(wiremock::matchers::body_string("payload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let addr = start_relay().await;
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", addr)).unwrap())
        .build()
        .unwrap();

    let response = client
        .post(format!("{}/submit", upstream.uri()))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}
