//! Per-class fetch strategies
//!
//! Each strategy owns the decision tree for one [`ContentClass`]: where to
//! look in the store, when to go to the network, what to write back and how
//! to degrade when the network is gone. They share one [`StrategyContext`].
//!
//! [`ContentClass`]: crate::router::ContentClass

pub mod api;
pub mod image;
pub mod media;
pub mod static_assets;

pub use api::ApiDataStrategy;
pub use image::ImageStrategy;
pub use media::MediaStrategy;
pub use static_assets::StaticStrategy;

use crate::eviction::EvictionPolicy;
use crate::identity::{MatchOptions, RequestIdentity};
use crate::metrics::RelayMetrics;
use crate::models::{CacheEntry, InterceptRequest, InterceptResponse};
use crate::namespace::{NamespaceKind, NamespaceSet};
use crate::retry::RetryController;
use crate::store::Store;
use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Handles every request of one content class
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Produce a response; never fails, degraded paths synthesize one
    async fn handle(&self, request: &InterceptRequest) -> InterceptResponse;
}

/// Collaborators shared by all strategies
pub struct StrategyContext {
    pub store: Arc<dyn Store>,
    pub retry: RetryController,
    pub eviction: EvictionPolicy,
    pub namespaces: NamespaceSet,
    pub metrics: Arc<RelayMetrics>,
    pub vary_headers: Vec<String>,
}

impl StrategyContext {
    pub fn identity(&self, request: &InterceptRequest, options: MatchOptions) -> RequestIdentity {
        RequestIdentity::new(
            &request.method,
            &request.url,
            &request.headers,
            options,
            &self.vary_headers,
        )
    }

    /// Read one entry; store failures are logged and read as a miss
    pub async fn lookup(&self, namespace: &str, key: &str) -> Option<CacheEntry> {
        match self.store.get(namespace, key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Store read failed for {} in {}: {}", key, namespace, e);
                self.metrics.record_store_error();
                None
            }
        }
    }

    /// Write an entry into the current namespace of `kind`, then enforce its
    /// capacity. Returns whether the write succeeded.
    pub async fn store_and_evict(&self, kind: NamespaceKind, entry: CacheEntry) -> bool {
        let namespace = self.namespaces.current(kind).name();
        let key = entry.key.clone();
        if let Err(e) = self.store.put(&namespace, entry).await {
            warn!("Store write failed for {} in {}: {}", key, namespace, e);
            self.metrics.record_store_error();
            return false;
        }

        let evicted = self
            .eviction
            .run(self.store.as_ref(), &self.namespaces, kind)
            .await;
        self.metrics.record_evictions(evicted);
        true
    }
}

/// The JSON offline payload used for media and API data
pub fn offline_json(message: &str) -> InterceptResponse {
    InterceptResponse::json(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({
            "error": "Offline",
            "offline": true,
            "message": message,
        }),
    )
}

/// Strip the body from responses to HEAD requests
pub(crate) fn finish(request: &InterceptRequest, response: InterceptResponse) -> InterceptResponse {
    if request.is_head() {
        response.without_body()
    } else {
        response
    }
}
