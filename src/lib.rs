//! Offline caching relay
//!
//! Intercepts outbound content requests and decides, per request class,
//! whether to answer from a local store, fetch remotely and populate the
//! store, or degrade gracefully when the network is unavailable. Stored
//! audio can be served in byte ranges so a player can seek without
//! downloading the object again.
//!
//! # Architecture
//!
//! - [`RequestRouter`] classifies each request as media, image, API data,
//!   static asset or bypass
//! - The [`strategy`] modules hold one decision tree per class
//! - [`Store`] is the namespaced entry table ([`MemoryStore`], [`FileStore`])
//! - [`RangeSlicer`] cuts stored entries into `206` answers
//! - [`EvictionPolicy`] bounds the media and image namespaces
//! - [`RetryController`] wraps every outbound fetch
//! - [`NamespaceLifecycle`] precaches on install and prunes on activation
//! - [`ControlHandle`] accepts commands and publishes [`RelayEvent`]s
//! - [`OfflineRelay`] ties all of the above behind [`OfflineRelay::intercept`]
//!
//! # Example
//!
//! ```rust,no_run
//! use offline_relay::{InterceptRequest, OfflineRelay, RelayConfig};
//!
//! # async fn run() -> offline_relay::Result<()> {
//! let relay = OfflineRelay::from_config(RelayConfig::default()).await?;
//! relay.activate().await?;
//!
//! let request = InterceptRequest::get("https://x.supabase.co/audio/track.mp3")?;
//! match relay.intercept(&request).await {
//!     Some(response) => println!("answered with {}", response.status),
//!     None => println!("not intercepted"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod file_store;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod namespace;
pub mod range_slicer;
pub mod relay;
pub mod retry;
pub mod router;
pub mod server;
pub mod store;
pub mod strategy;

pub use config::{
    BackoffKind, ConfigChanges, RelayConfig, RetryConfig, RouteRule, RoutingConfig, StoreConfig,
};
pub use control::{ControlCommand, ControlHandle, ControlMessage, RelayEvent, SizeReport};
pub use error::{RelayError, Result};
pub use eviction::EvictionPolicy;
pub use fetcher::{Fetcher, HttpFetcher, UpstreamRequest, UpstreamResponse};
pub use file_store::FileStore;
pub use identity::{MatchOptions, RequestIdentity};
pub use lifecycle::{ActivationReport, InstallReport, NamespaceLifecycle};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{ByteRange, CacheEntry, InterceptRequest, InterceptResponse, RangeSpec};
pub use namespace::{CacheNamespace, NamespaceKind, NamespaceSet};
pub use range_slicer::RangeSlicer;
pub use relay::OfflineRelay;
pub use retry::{RetryController, RetryPolicy};
pub use router::{ContentClass, RequestRouter};
pub use server::RelayServer;
pub use store::{MemoryStore, Store};
