//! The relay: wires store, fetcher and strategies behind one interception hook

use crate::config::RelayConfig;
use crate::control::{ControlHandle, ControlWorker, RelayEvent};
use crate::error::{RelayError, Result};
use crate::eviction::EvictionPolicy;
use crate::fetcher::{Fetcher, HttpFetcher, UpstreamRequest, UpstreamResponse};
use crate::file_store::FileStore;
use crate::lifecycle::{ActivationReport, InstallReport, NamespaceLifecycle};
use crate::metrics::RelayMetrics;
use crate::models::{InterceptRequest, InterceptResponse};
use crate::namespace::NamespaceSet;
use crate::retry::{RetryController, RetryPolicy};
use crate::router::{ContentClass, RequestRouter};
use crate::store::{MemoryStore, Store};
use crate::strategy::{
    ApiDataStrategy, FetchStrategy, ImageStrategy, MediaStrategy, StaticStrategy, StrategyContext,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Offline caching relay
///
/// Cheap to clone; clones share the store, metrics and control channel.
#[derive(Clone)]
pub struct OfflineRelay {
    config: Arc<RelayConfig>,
    router: Arc<RequestRouter>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<RelayMetrics>,
    media: Arc<MediaStrategy>,
    image: Arc<ImageStrategy>,
    api: Arc<ApiDataStrategy>,
    statics: Arc<StaticStrategy>,
    lifecycle: Arc<NamespaceLifecycle>,
    control: ControlHandle,
}

impl OfflineRelay {
    /// Assemble a relay from its collaborators
    ///
    /// Starts the control worker, so it must be called from within a Tokio
    /// runtime.
    pub fn new(config: RelayConfig, store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let namespaces = NamespaceSet::from_config(&config);
        let retry = RetryController::new(
            Arc::clone(&fetcher),
            RetryPolicy::from_config(&config.retry),
            Arc::clone(&metrics),
        );

        let ctx = Arc::new(StrategyContext {
            store: Arc::clone(&store),
            retry,
            eviction: EvictionPolicy::new(config.media_limit, config.image_limit),
            namespaces: namespaces.clone(),
            metrics: Arc::clone(&metrics),
            vary_headers: config.vary_headers.clone(),
        });

        let statics = Arc::new(StaticStrategy::new(Arc::clone(&ctx)));
        let lifecycle = Arc::new(NamespaceLifecycle::new(
            store,
            namespaces,
            Arc::clone(&statics),
            config.precache_urls.clone(),
        ));
        let (control, _worker) = ControlWorker::spawn(Arc::clone(&ctx));

        info!(
            "Relay ready: media={}, image={}, static={}",
            ctx.namespaces.media.name(),
            ctx.namespaces.image.name(),
            ctx.namespaces.statics.name()
        );

        OfflineRelay {
            router: Arc::new(RequestRouter::new(config.routing.clone())),
            config: Arc::new(config),
            fetcher,
            metrics,
            media: Arc::new(MediaStrategy::new(Arc::clone(&ctx))),
            image: Arc::new(ImageStrategy::new(Arc::clone(&ctx))),
            api: Arc::new(ApiDataStrategy::new(ctx)),
            statics,
            lifecycle,
            control,
        }
    }

    /// Build the store and fetcher the configuration names
    ///
    /// A file backend that cannot be opened is logged and replaced by an
    /// in-memory store so the relay still starts.
    pub async fn from_config(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn Store> = match config.store.backend.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            "file" => match FileStore::open(&config.store.dir).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(
                        "File store unavailable at {}, nothing will survive a restart: {}",
                        config.store.dir, e
                    );
                    Arc::new(MemoryStore::new())
                }
            },
            other => {
                return Err(RelayError::ConfigError(format!(
                    "unknown store backend '{}'",
                    other
                )))
            }
        };
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.upstream_timeout_secs,
        ))?);

        Ok(Self::new(config, store, fetcher))
    }

    /// The interception hook
    ///
    /// # Returns
    /// * `None` when the request is not intercepted; the caller forwards it
    /// * `Some(response)` otherwise, including synthesized offline answers
    pub async fn intercept(&self, request: &InterceptRequest) -> Option<InterceptResponse> {
        let class = self.router.classify(request);
        self.metrics.record_request(class);

        let strategy: &dyn FetchStrategy = match class {
            ContentClass::Bypass => return None,
            ContentClass::Media => self.media.as_ref(),
            ContentClass::Image => self.image.as_ref(),
            ContentClass::ApiData => self.api.as_ref(),
            ContentClass::Static => self.statics.as_ref(),
        };

        let start = Instant::now();
        let response = strategy.handle(request).await;
        self.metrics.record_request_duration(start.elapsed());

        debug!(
            "Intercepted {} {} as {}: status={}",
            request.method, request.url, class, response.status
        );
        Some(response)
    }

    /// Forward a bypassed request untouched, with no retries
    pub async fn forward(
        &self,
        request: &InterceptRequest,
        body: Bytes,
    ) -> Result<UpstreamResponse> {
        self.fetcher
            .fetch(&UpstreamRequest::forward(request).with_body(body))
            .await
    }

    pub async fn install(&self) -> InstallReport {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.control.subscribe()
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn metrics_arc(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}
