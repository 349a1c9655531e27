//! Static asset strategy: cache-first on the generation-scoped namespace

use super::{FetchStrategy, StrategyContext};
use crate::error::Result;
use crate::fetcher::UpstreamRequest;
use crate::identity::MatchOptions;
use crate::models::{CacheEntry, InterceptRequest, InterceptResponse};
use crate::namespace::NamespaceKind;
use async_trait::async_trait;
use http::{header, Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct StaticStrategy {
    ctx: Arc<StrategyContext>,
}

impl StaticStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        StaticStrategy { ctx }
    }

    fn offline() -> InterceptResponse {
        InterceptResponse::new(StatusCode::SERVICE_UNAVAILABLE)
            .with_header(header::CONTENT_TYPE, "text/plain")
            .with_body("Offline - page not available")
    }

    /// Fetch `request` and store it when the answer is a plain 200
    ///
    /// HEAD is fetched as GET so the stored entry has a body. Shared with
    /// install-time precaching.
    pub async fn fetch_and_store(&self, request: &InterceptRequest) -> Result<InterceptResponse> {
        let ctx = &self.ctx;
        let key = ctx.identity(request, MatchOptions::exact()).key();
        let mut upstream = UpstreamRequest::forward(request);
        upstream.method = Method::GET;
        let response = ctx.retry.fetch(&upstream).await?;
        ctx.metrics.record_bytes_from_origin(response.body.len() as u64);

        if response.is_plain_success() {
            let entry = CacheEntry::new(
                key,
                request.url.as_str(),
                response.status.as_u16(),
                &response.headers,
                response.body.clone(),
            );
            ctx.store_and_evict(NamespaceKind::Static, entry).await;
        } else {
            debug!(
                "Not storing static response: url={}, status={}, redirected={}",
                request.url, response.status, response.redirected
            );
        }
        Ok(response.into_response())
    }
}

#[async_trait]
impl FetchStrategy for StaticStrategy {
    async fn handle(&self, request: &InterceptRequest) -> InterceptResponse {
        let ctx = &self.ctx;
        let namespace = ctx.namespaces.statics.name();
        let key = ctx.identity(request, MatchOptions::exact()).key();

        if let Some(entry) = ctx.lookup(&namespace, &key).await {
            debug!("Static hit: key={}", key);
            ctx.metrics.record_cache_hit(entry.len());
            return super::finish(request, entry.to_response());
        }
        ctx.metrics.record_cache_miss();

        match self.fetch_and_store(request).await {
            Ok(response) => super::finish(request, response),
            Err(e) => {
                warn!("Static fetch failed for {}: {}", request.url, e);
                ctx.metrics.record_offline_response();
                Self::offline()
            }
        }
    }
}
