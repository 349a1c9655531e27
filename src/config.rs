//! Configuration management for the offline relay

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Prefix shared by every namespace this relay owns (default: "relay")
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Application generation; the static namespace rotates whenever it changes
    #[serde(default = "default_generation")]
    pub generation: String,

    /// Storage generation for the long-lived media and image namespaces
    #[serde(default = "default_pinned_generation")]
    pub pinned_generation: String,

    /// Maximum number of entries kept in the media namespace (default: 50)
    #[serde(default = "default_media_limit")]
    pub media_limit: usize,

    /// Maximum number of entries kept in the image namespace (default: 100)
    #[serde(default = "default_image_limit")]
    pub image_limit: usize,

    /// URLs fetched into the static namespace on install
    #[serde(default = "default_precache_urls")]
    pub precache_urls: Vec<String>,

    /// Request headers that take part in identity matching unless a strategy ignores vary
    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,

    /// Retry settings for outbound fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Request classification rules
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Storage backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbound request timeout in seconds (default: 30)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Address the proxy front end listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Backoff growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// base, 2*base, 3*base, ...
    Linear,
    /// base, 2*base, 4*base, ...
    Exponential,
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per logical fetch, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay in milliseconds (default: 1000)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// How the delay grows between attempts (default: linear)
    #[serde(default = "default_backoff_kind")]
    pub backoff: BackoffKind,

    /// Upstream statuses worth retrying (default: 429, 503)
    #[serde(default = "default_transient_statuses")]
    pub transient_statuses: Vec<u16>,
}

/// One classification rule: host substring AND (path segment OR path suffix)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteRule {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub path_segments: Vec<String>,
    #[serde(default)]
    pub path_suffixes: Vec<String>,
}

/// Request classification rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    /// Hosts that are never intercepted
    #[serde(default = "default_bypass_hosts")]
    pub bypass_hosts: Vec<String>,

    #[serde(default = "default_media_rule")]
    pub media: RouteRule,

    #[serde(default = "default_image_rule")]
    pub image: RouteRule,

    /// Hosts whose remaining traffic is treated as API data
    #[serde(default = "default_api_hosts")]
    pub api_hosts: Vec<String>,
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// "memory" or "file" (default: "memory")
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Root directory of the file backend
    #[serde(default = "default_store_dir")]
    pub dir: String,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff: default_backoff_kind(),
            transient_statuses: default_transient_statuses(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bypass_hosts: default_bypass_hosts(),
            media: default_media_rule(),
            image: default_image_rule(),
            api_hosts: default_api_hosts(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            dir: default_store_dir(),
        }
    }
}

// Default value functions for serde
fn default_namespace_prefix() -> String {
    "relay".to_string()
}

fn default_generation() -> String {
    "v1".to_string()
}

fn default_pinned_generation() -> String {
    "v1".to_string()
}

fn default_media_limit() -> usize {
    50
}

fn default_image_limit() -> usize {
    100
}

fn default_precache_urls() -> Vec<String> {
    Vec::new()
}

fn default_vary_headers() -> Vec<String> {
    vec!["accept-encoding".to_string()]
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Linear
}

fn default_transient_statuses() -> Vec<u16> {
    vec![429, 503]
}

fn default_bypass_hosts() -> Vec<String> {
    vec!["firebase".to_string()]
}

fn default_media_rule() -> RouteRule {
    RouteRule {
        hosts: vec!["supabase".to_string()],
        path_segments: vec!["/audio/".to_string(), "/music/".to_string()],
        path_suffixes: vec![".mp3".to_string(), ".m4a".to_string(), ".wav".to_string()],
    }
}

fn default_image_rule() -> RouteRule {
    RouteRule {
        hosts: vec!["supabase".to_string()],
        path_segments: vec!["/assets/".to_string(), "/albumphoto/".to_string()],
        path_suffixes: vec![".jpg".to_string(), ".png".to_string(), ".webp".to_string()],
    }
}

fn default_api_hosts() -> Vec<String> {
    vec!["supabase".to_string()]
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_store_dir() -> String {
    "/var/cache/offline-relay".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            namespace_prefix: default_namespace_prefix(),
            generation: default_generation(),
            pinned_generation: default_pinned_generation(),
            media_limit: default_media_limit(),
            image_limit: default_image_limit(),
            precache_urls: default_precache_urls(),
            vary_headers: default_vary_headers(),
            retry: RetryConfig::default(),
            routing: RoutingConfig::default(),
            store: StoreConfig::default(),
            upstream_timeout_secs: default_upstream_timeout(),
            listen_address: default_listen_address(),
            metrics_endpoint: None,
        }
    }
}

fn is_name_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

impl RelayConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(RelayConfig)` if loading and validation succeed
    /// * `Err(RelayError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: RelayConfig = serde_yaml::from_str(content).map_err(|e| {
            RelayError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - namespace_prefix, generation and pinned_generation must be non-empty and
    ///   must not contain '-' (namespace names are split on it)
    /// - media_limit and image_limit must be > 0
    /// - retry.max_attempts must be between 1 and 10
    /// - retry.transient_statuses must be 4xx/5xx codes
    /// - store.backend must be "memory" or "file"
    /// - upstream_timeout_secs must be > 0
    pub fn validate(&self) -> Result<()> {
        const MAX_ATTEMPTS: usize = 10;

        for (field, value) in [
            ("namespace_prefix", &self.namespace_prefix),
            ("generation", &self.generation),
            ("pinned_generation", &self.pinned_generation),
        ] {
            if !is_name_token(value) {
                return Err(RelayError::ConfigError(format!(
                    "{} must be non-empty and contain only [A-Za-z0-9._], got '{}'",
                    field, value
                )));
            }
        }

        if self.media_limit == 0 || self.image_limit == 0 {
            return Err(RelayError::ConfigError(
                "media_limit and image_limit must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_ATTEMPTS {
            return Err(RelayError::ConfigError(format!(
                "retry.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS, self.retry.max_attempts
            )));
        }

        if let Some(status) = self
            .retry
            .transient_statuses
            .iter()
            .find(|s| !(400..600).contains(*s))
        {
            return Err(RelayError::ConfigError(format!(
                "retry.transient_statuses must be 4xx or 5xx codes, got {}",
                status
            )));
        }

        match self.store.backend.as_str() {
            "memory" => {}
            "file" => {
                if self.store.dir.is_empty() {
                    return Err(RelayError::ConfigError(
                        "store.dir is required when store.backend is 'file'".to_string(),
                    ));
                }
            }
            other => {
                return Err(RelayError::ConfigError(format!(
                    "Invalid store.backend '{}', must be 'memory' or 'file'",
                    other
                )));
            }
        }

        if self.upstream_timeout_secs == 0 {
            return Err(RelayError::ConfigError(
                "upstream_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Update configuration from another config
    ///
    /// Applies every field of `new_config` after validating it and reports
    /// which parts changed. The original config is untouched on error.
    pub fn update_from(&mut self, new_config: &RelayConfig) -> Result<ConfigChanges> {
        new_config.validate()?;

        let mut changes = ConfigChanges::default();

        if self.namespace_prefix != new_config.namespace_prefix
            || self.generation != new_config.generation
            || self.pinned_generation != new_config.pinned_generation
        {
            changes.namespaces_changed = true;
            self.namespace_prefix = new_config.namespace_prefix.clone();
            self.generation = new_config.generation.clone();
            self.pinned_generation = new_config.pinned_generation.clone();
        }

        if self.media_limit != new_config.media_limit || self.image_limit != new_config.image_limit
        {
            changes.limits_changed = true;
            self.media_limit = new_config.media_limit;
            self.image_limit = new_config.image_limit;
        }

        if self.precache_urls != new_config.precache_urls {
            changes.precache_changed = true;
            self.precache_urls = new_config.precache_urls.clone();
        }

        if self.vary_headers != new_config.vary_headers {
            changes.vary_headers_changed = true;
            self.vary_headers = new_config.vary_headers.clone();
        }

        if self.retry != new_config.retry {
            changes.retry_changed = true;
            self.retry = new_config.retry.clone();
        }

        if self.routing != new_config.routing {
            changes.routing_changed = true;
            self.routing = new_config.routing.clone();
        }

        if self.store != new_config.store {
            changes.store_changed = true;
            self.store = new_config.store.clone();
        }

        if self.upstream_timeout_secs != new_config.upstream_timeout_secs {
            changes.upstream_timeout_changed = true;
            self.upstream_timeout_secs = new_config.upstream_timeout_secs;
        }

        if self.listen_address != new_config.listen_address {
            changes.listen_address_changed = true;
            self.listen_address = new_config.listen_address.clone();
        }

        if self.metrics_endpoint != new_config.metrics_endpoint {
            changes.metrics_endpoint_changed = true;
            self.metrics_endpoint = new_config.metrics_endpoint.clone();
        }

        Ok(changes)
    }

    /// Reload configuration from file and apply changes
    pub fn reload_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ConfigChanges> {
        let new_config = Self::from_file(path)?;
        self.update_from(&new_config)
    }
}

/// Description of configuration changes after hot reload
#[derive(Debug, Default, Clone)]
pub struct ConfigChanges {
    pub namespaces_changed: bool,
    pub limits_changed: bool,
    pub precache_changed: bool,
    pub vary_headers_changed: bool,
    pub retry_changed: bool,
    pub routing_changed: bool,
    pub store_changed: bool,
    pub upstream_timeout_changed: bool,
    pub listen_address_changed: bool,
    pub metrics_endpoint_changed: bool,
}

impl ConfigChanges {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        !self.summary().is_empty()
    }

    /// Whether the change needs a new install/activate cycle
    pub fn requires_activation(&self) -> bool {
        self.namespaces_changed || self.precache_changed || self.store_changed
    }

    /// Get a summary of changes
    pub fn summary(&self) -> Vec<String> {
        let flags = [
            (self.namespaces_changed, "namespaces"),
            (self.limits_changed, "limits"),
            (self.precache_changed, "precache_urls"),
            (self.vary_headers_changed, "vary_headers"),
            (self.retry_changed, "retry"),
            (self.routing_changed, "routing"),
            (self.store_changed, "store"),
            (self.upstream_timeout_changed, "upstream_timeout_secs"),
            (self.listen_address_changed, "listen_address"),
            (self.metrics_endpoint_changed, "metrics_endpoint"),
        ];

        flags
            .iter()
            .filter(|(changed, _)| *changed)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}
