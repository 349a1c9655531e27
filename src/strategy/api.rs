//! API-data strategy: network only, never stored

use super::{offline_json, FetchStrategy, StrategyContext};
use crate::fetcher::UpstreamRequest;
use crate::models::{InterceptRequest, InterceptResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

const OFFLINE_MESSAGE: &str = "Data is not available offline";

pub struct ApiDataStrategy {
    ctx: Arc<StrategyContext>,
}

impl ApiDataStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        ApiDataStrategy { ctx }
    }
}

#[async_trait]
impl FetchStrategy for ApiDataStrategy {
    async fn handle(&self, request: &InterceptRequest) -> InterceptResponse {
        match self.ctx.retry.fetch(&UpstreamRequest::forward(request)).await {
            Ok(response) => {
                self.ctx
                    .metrics
                    .record_bytes_from_origin(response.body.len() as u64);
                response.into_response()
            }
            Err(e) => {
                warn!("API request failed for {}: {}", request.url, e);
                self.ctx.metrics.record_offline_response();
                offline_json(OFFLINE_MESSAGE)
            }
        }
    }
}
