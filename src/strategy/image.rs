//! Image strategy: stale-while-revalidate with an SVG placeholder offline

use super::{finish, FetchStrategy, StrategyContext};
use crate::fetcher::UpstreamRequest;
use crate::identity::MatchOptions;
use crate::models::{CacheEntry, InterceptRequest, InterceptResponse};
use crate::namespace::NamespaceKind;
use async_trait::async_trait;
use http::{header, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed placeholder served when an image is neither stored nor reachable
pub const OFFLINE_IMAGE_SVG: &str = concat!(
    r##"<svg width="300" height="300" xmlns="http://www.w3.org/2000/svg">"##,
    r##"<rect fill="#181818" width="300" height="300"/>"##,
    r##"<text fill="#666" x="50%" y="50%" text-anchor="middle" font-size="14">Offline</text>"##,
    r##"</svg>"##
);

pub struct ImageStrategy {
    ctx: Arc<StrategyContext>,
}

impl ImageStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        ImageStrategy { ctx }
    }

    fn placeholder() -> InterceptResponse {
        InterceptResponse::new(StatusCode::OK)
            .with_header(header::CONTENT_TYPE, "image/svg+xml")
            .with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .with_body(OFFLINE_IMAGE_SVG)
    }

    /// Refresh a stored image in a detached task
    ///
    /// The caller has already been answered from the store; every failure in
    /// here is dropped after a debug line.
    fn revalidate(&self, request: &InterceptRequest, key: String) {
        let ctx = Arc::clone(&self.ctx);
        let upstream = UpstreamRequest::full_object(request);

        tokio::spawn(async move {
            match ctx.retry.fetch(&upstream).await {
                Ok(response) if response.status.is_success() => {
                    ctx.metrics.record_bytes_from_origin(response.body.len() as u64);
                    let entry = CacheEntry::new(
                        key,
                        upstream.url.as_str(),
                        response.status.as_u16(),
                        &response.headers,
                        response.body,
                    );
                    if ctx.store_and_evict(NamespaceKind::Image, entry).await {
                        debug!("Revalidated image: {}", upstream.url);
                    }
                }
                Ok(response) => {
                    debug!(
                        "Image revalidation skipped: url={}, status={}",
                        upstream.url, response.status
                    );
                }
                Err(e) => {
                    debug!("Image revalidation failed: url={}: {}", upstream.url, e);
                }
            }
        });
    }
}

#[async_trait]
impl FetchStrategy for ImageStrategy {
    async fn handle(&self, request: &InterceptRequest) -> InterceptResponse {
        let ctx = &self.ctx;
        let namespace = ctx.namespaces.image.name();
        let options = MatchOptions {
            ignore_search: true,
            ignore_vary: false,
        };
        let key = ctx.identity(request, options).key();

        if let Some(entry) = ctx.lookup(&namespace, &key).await {
            debug!("Image hit: key={}", key);
            ctx.metrics.record_cache_hit(entry.len());
            self.revalidate(request, key);
            return finish(request, entry.to_response());
        }
        ctx.metrics.record_cache_miss();

        match ctx.retry.fetch(&UpstreamRequest::full_object(request)).await {
            Ok(response) => {
                ctx.metrics.record_bytes_from_origin(response.body.len() as u64);
                if !response.status.is_success() {
                    return finish(request, response.into_response());
                }

                let entry = CacheEntry::new(
                    key,
                    request.url.as_str(),
                    response.status.as_u16(),
                    &response.headers,
                    response.body.clone(),
                );
                ctx.store_and_evict(NamespaceKind::Image, entry).await;
                finish(request, response.into_response())
            }
            Err(e) => {
                warn!("Image fetch failed for {}: {}", request.url, e);
                ctx.metrics.record_offline_response();
                finish(request, Self::placeholder())
            }
        }
    }
}
