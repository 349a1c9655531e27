//! Media (audio) strategy: cache-first with byte-range slicing and an
//! offline path-only fallback

use super::{finish, offline_json, FetchStrategy, StrategyContext};
use crate::fetcher::UpstreamRequest;
use crate::identity::{path_of_key, MatchOptions};
use crate::models::{CacheEntry, InterceptRequest, InterceptResponse, RangeSpec};
use crate::namespace::NamespaceKind;
use crate::range_slicer::RangeSlicer;
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

const OFFLINE_MESSAGE: &str =
    "This track has not been downloaded for offline use. Play it once while online to keep it.";

pub struct MediaStrategy {
    ctx: Arc<StrategyContext>,
}

impl MediaStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        MediaStrategy { ctx }
    }

    /// Serve a stored entry, sliced when the request carries a usable range
    fn serve(&self, request: &InterceptRequest, entry: &CacheEntry) -> InterceptResponse {
        let response = match requested_range(request) {
            Some(range) => {
                let response = RangeSlicer::slice(entry, &range);
                if response.status == StatusCode::PARTIAL_CONTENT {
                    self.ctx.metrics.record_partial_response();
                } else {
                    self.ctx.metrics.record_unsatisfiable_range();
                }
                response
            }
            None => RangeSlicer::full(entry),
        };
        finish(request, response)
    }

    /// Relaxed lookup by URL path only, across every stored media entry
    ///
    /// Host and query are ignored so the same file served from another CDN
    /// host still matches.
    async fn fallback(&self, request: &InterceptRequest) -> Option<CacheEntry> {
        let namespace = self.ctx.namespaces.media.name();
        let keys = match self.ctx.store.keys(&namespace).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Fallback listing failed for {}: {}", namespace, e);
                self.ctx.metrics.record_store_error();
                return None;
            }
        };

        let path = request.url.path();
        for key in keys.iter().rev() {
            if path_of_key(key).as_deref() == Some(path) {
                if let Some(entry) = self.ctx.lookup(&namespace, key).await {
                    return Some(entry);
                }
            }
        }
        None
    }
}

/// Parsed Range header; malformed or unsupported forms mean "no range"
fn requested_range(request: &InterceptRequest) -> Option<RangeSpec> {
    let header = request.range_header()?;
    match RangeSpec::from_header(header) {
        Ok(range) => Some(range),
        Err(e) => {
            debug!("Ignoring Range header '{}': {}", header, e);
            None
        }
    }
}

#[async_trait]
impl FetchStrategy for MediaStrategy {
    async fn handle(&self, request: &InterceptRequest) -> InterceptResponse {
        let ctx = &self.ctx;
        let namespace = ctx.namespaces.media.name();
        let key = ctx.identity(request, MatchOptions::loose()).key();

        if let Some(entry) = ctx.lookup(&namespace, &key).await {
            debug!("Media hit: key={}, size={}", key, entry.len());
            ctx.metrics.record_cache_hit(entry.len());
            return self.serve(request, &entry);
        }
        ctx.metrics.record_cache_miss();

        debug!("Media miss, fetching: url={}", request.url);
        match ctx.retry.fetch(&UpstreamRequest::full_object(request)).await {
            Ok(response) => {
                ctx.metrics.record_bytes_from_origin(response.body.len() as u64);

                if response.status != StatusCode::OK {
                    if response.status == StatusCode::PARTIAL_CONTENT {
                        debug!("Not caching partial upstream answer for {}", request.url);
                    }
                    return finish(request, response.into_response());
                }

                let entry = CacheEntry::new(
                    key,
                    request.url.as_str(),
                    response.status.as_u16(),
                    &response.headers,
                    response.body,
                );
                let response = self.serve(request, &entry);
                if ctx.store_and_evict(NamespaceKind::Media, entry).await {
                    info!("Cached media: {}", request.url);
                }
                response
            }
            Err(e) => {
                warn!("Media fetch failed for {}: {}", request.url, e);
                if let Some(entry) = self.fallback(request).await {
                    debug!("Media fallback hit: path={}", request.url.path());
                    ctx.metrics.record_fallback_hit();
                    ctx.metrics.record_cache_hit(entry.len());
                    return self.serve(request, &entry);
                }

                ctx.metrics.record_offline_response();
                finish(request, offline_json(OFFLINE_MESSAGE))
            }
        }
    }
}
