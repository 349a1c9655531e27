//! Control channel
//!
//! Commands reach the relay as [`ControlCommand`] values over an mpsc
//! channel and are executed by a single worker task. Outcomes that other
//! parties care about are published as [`RelayEvent`]s on a broadcast
//! channel; with no subscribers an event is simply dropped.
//!
//! [`ControlMessage`] is the JSON wire form accepted by the HTTP front end.

use crate::error::{RelayError, Result};
use crate::fetcher::UpstreamRequest;
use crate::identity::{MatchOptions, RequestIdentity};
use crate::models::CacheEntry;
use crate::namespace::NamespaceKind;
use crate::strategy::StrategyContext;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// A command for the relay
#[derive(Debug)]
pub enum ControlCommand {
    /// Fetch and store a media object ahead of playback
    CacheMedia { url: Url, metadata: Option<Value> },
    /// Empty the current namespace of `kind`
    ClearNamespace { kind: NamespaceKind },
    /// Report entry counts and limits
    ReportSize { reply: oneshot::Sender<SizeReport> },
}

/// Wire form of a control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    CacheMedia {
        url: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
    ClearNamespace {
        #[serde(default = "default_clear_kind")]
        kind: NamespaceKind,
    },
    ReportSize,
}

fn default_clear_kind() -> NamespaceKind {
    NamespaceKind::Media
}

/// Entry counts of the bounded namespaces with their limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeReport {
    pub media_count: usize,
    pub image_count: usize,
    pub media_limit: usize,
    pub image_limit: usize,
}

/// Notifications published by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayEvent {
    MediaCached {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    NamespaceCleared {
        kind: NamespaceKind,
    },
}

impl RelayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::MediaCached { .. } => "MEDIA_CACHED",
            RelayEvent::NamespaceCleared { .. } => "NAMESPACE_CLEARED",
        }
    }
}

/// Sending side of the control channel
#[derive(Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<ControlCommand>,
    events: broadcast::Sender<RelayEvent>,
}

impl ControlHandle {
    pub async fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    pub async fn cache_media(&self, url: Url, metadata: Option<Value>) -> Result<()> {
        self.send(ControlCommand::CacheMedia { url, metadata }).await
    }

    pub async fn clear_namespace(&self, kind: NamespaceKind) -> Result<()> {
        self.send(ControlCommand::ClearNamespace { kind }).await
    }

    pub async fn report_size(&self) -> Result<SizeReport> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::ReportSize { reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }

    /// Execute a wire message; only size reports produce a reply
    pub async fn dispatch(&self, message: ControlMessage) -> Result<Option<SizeReport>> {
        match message {
            ControlMessage::CacheMedia { url, metadata } => {
                let url = Url::parse(&url).map_err(|e| {
                    RelayError::InvalidRequest(format!("invalid url '{}': {}", url, e))
                })?;
                self.cache_media(url, metadata).await?;
                Ok(None)
            }
            ControlMessage::ClearNamespace { kind } => {
                self.clear_namespace(kind).await?;
                Ok(None)
            }
            ControlMessage::ReportSize => self.report_size().await.map(Some),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}

/// Executes control commands against the store
pub struct ControlWorker {
    ctx: Arc<StrategyContext>,
    events: broadcast::Sender<RelayEvent>,
}

impl ControlWorker {
    /// Start the worker task and return the handle feeding it
    pub fn spawn(ctx: Arc<StrategyContext>) -> (ControlHandle, JoinHandle<()>) {
        let (commands, mut rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let worker = Arc::new(ControlWorker {
            ctx,
            events: events.clone(),
        });
        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                worker.execute(command).await;
            }
            debug!("Control channel closed, worker exiting");
        });

        (ControlHandle { commands, events }, task)
    }

    async fn execute(self: &Arc<Self>, command: ControlCommand) {
        match command {
            ControlCommand::CacheMedia { url, metadata } => {
                // Downloads run on their own so a slow object does not hold
                // up size reports
                let worker = Arc::clone(self);
                tokio::spawn(async move {
                    worker.cache_media(url, metadata).await;
                });
            }
            ControlCommand::ClearNamespace { kind } => self.clear_namespace(kind).await,
            ControlCommand::ReportSize { reply } => {
                let report = self.size_report().await;
                if reply.send(report).is_err() {
                    debug!("Size report requester went away");
                }
            }
        }
    }

    fn broadcast(&self, event: RelayEvent) {
        let event_type = event.event_type();
        match self.events.send(event) {
            Ok(receivers) => debug!("Broadcast {} to {} receivers", event_type, receivers),
            Err(_) => debug!("No receivers for {}", event_type),
        }
    }

    async fn cache_media(&self, url: Url, metadata: Option<Value>) {
        let ctx = &self.ctx;
        info!("Caching media on request: {}", url);

        let response = match ctx.retry.fetch(&UpstreamRequest::get(url.clone())).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to cache media {}: {}", url, e);
                return;
            }
        };
        if response.status != StatusCode::OK {
            warn!("Cannot cache {}: status {} (need 200)", url, response.status);
            return;
        }
        ctx.metrics
            .record_bytes_from_origin(response.body.len() as u64);

        let key = RequestIdentity::for_url(&url, MatchOptions::loose()).key();
        let entry = CacheEntry::new(
            key,
            url.as_str(),
            response.status.as_u16(),
            &response.headers,
            response.body,
        )
        .with_metadata(metadata.as_ref());

        if ctx.store_and_evict(NamespaceKind::Media, entry).await {
            info!("Media cached: {}", url);
            self.broadcast(RelayEvent::MediaCached {
                url: url.to_string(),
                metadata,
            });
        }
    }

    async fn clear_namespace(&self, kind: NamespaceKind) {
        let name = self.ctx.namespaces.current(kind).name();
        match self.ctx.store.delete_namespace(&name).await {
            Ok(_) => {
                info!("Cleared namespace {}", name);
                self.broadcast(RelayEvent::NamespaceCleared { kind });
            }
            Err(e) => warn!("Failed to clear namespace {}: {}", name, e),
        }
    }

    async fn count(&self, kind: NamespaceKind) -> usize {
        let name = self.ctx.namespaces.current(kind).name();
        match self.ctx.store.len(&name).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Size report failed for {}: {}", name, e);
                0
            }
        }
    }

    /// Counts of the bounded namespaces; storage failures report zero
    async fn size_report(&self) -> SizeReport {
        SizeReport {
            media_count: self.count(NamespaceKind::Media).await,
            image_count: self.count(NamespaceKind::Image).await,
            media_limit: self.ctx.eviction.media_limit,
            image_limit: self.ctx.eviction.image_limit,
        }
    }
}
