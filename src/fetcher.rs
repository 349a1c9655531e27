//! Outbound fetching
//!
//! [`Fetcher`] is the network collaborator every strategy goes through. The
//! production implementation, [`HttpFetcher`], wraps a pooled `reqwest`
//! client; tests substitute scripted fetchers.

use crate::error::{RelayError, Result};
use crate::models::{InterceptRequest, InterceptResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request headers that are never forwarded upstream
const STRIPPED_REQUEST_HEADERS: [header::HeaderName; 3] =
    [header::HOST, header::CONNECTION, header::PROXY_AUTHORIZATION];

/// An outbound request
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Request body; only bypassed requests carry one
    pub body: Bytes,
}

impl UpstreamRequest {
    /// A bare GET for the full object
    pub fn get(url: Url) -> Self {
        UpstreamRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Forward an intercepted request as-is
    pub fn forward(request: &InterceptRequest) -> Self {
        let mut headers = request.headers.clone();
        for name in &STRIPPED_REQUEST_HEADERS {
            headers.remove(name);
        }
        UpstreamRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers,
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Forward an intercepted request, asking for the complete object
    ///
    /// Range and conditional headers are removed so the upstream answer is a
    /// full body that can be stored.
    pub fn full_object(request: &InterceptRequest) -> Self {
        let mut upstream = Self::forward(request);
        upstream.method = Method::GET;
        for name in [
            header::RANGE,
            header::IF_RANGE,
            header::IF_MATCH,
            header::IF_NONE_MATCH,
            header::IF_MODIFIED_SINCE,
            header::IF_UNMODIFIED_SINCE,
        ] {
            upstream.headers.remove(name);
        }
        upstream
    }
}

/// A response received from upstream
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects
    pub url: Url,
    /// Whether any redirect was followed
    pub redirected: bool,
}

impl UpstreamResponse {
    /// A complete, direct 200 (no redirects, not partial)
    pub fn is_plain_success(&self) -> bool {
        self.status == StatusCode::OK && !self.redirected
    }

    /// Hand the response to the caller unchanged
    pub fn into_response(self) -> InterceptResponse {
        InterceptResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Network fetch capability
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one attempt. Any HTTP status is `Ok`; only transport failures
    /// are errors.
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse>;
}

/// `reqwest`-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RelayError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        debug!("Fetching upstream: method={}, url={}", request.method, request.url);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let redirected = url != request.url;

        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to read response body: {}", e)))?;

        debug!(
            "Upstream responded: url={}, status={}, size={}",
            url,
            status,
            body.len()
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body,
            url,
            redirected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_object_strips_range() {
        let request = InterceptRequest::new(Method::HEAD, Url::parse("https://h/a.mp3").unwrap())
            .with_header(header::RANGE, "bytes=0-99")
            .with_header(header::IF_NONE_MATCH, "\"x\"")
            .with_header(header::ACCEPT, "audio/*");

        let upstream = UpstreamRequest::full_object(&request);
        assert_eq!(upstream.method, Method::GET);
        assert!(upstream.headers.get(header::RANGE).is_none());
        assert!(upstream.headers.get(header::IF_NONE_MATCH).is_none());
        assert_eq!(upstream.headers.get(header::ACCEPT).unwrap(), "audio/*");
    }

    #[test]
    fn test_forward_strips_host() {
        let request = InterceptRequest::new(Method::GET, Url::parse("https://h/x").unwrap())
            .with_header(header::HOST, "h")
            .with_header(header::RANGE, "bytes=0-1");

        let upstream = UpstreamRequest::forward(&request);
        assert!(upstream.headers.get(header::HOST).is_none());
        assert!(upstream.headers.get(header::RANGE).is_some());
    }

    #[test]
    fn test_http_fetcher_new() {
        assert!(HttpFetcher::new(Duration::from_secs(5)).is_ok());
    }
}
