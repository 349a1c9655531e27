//! Namespace naming
//!
//! Every namespace name encodes the relay prefix, the content kind and a
//! generation tag: `{prefix}-{kind}-{generation}`. The lifecycle manager
//! deletes namespaces by exact name mismatch, so both parts are required.

use crate::config::RelayConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The content kind a namespace holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    Media,
    Image,
    Static,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 3] = [
        NamespaceKind::Media,
        NamespaceKind::Image,
        NamespaceKind::Static,
    ];

    /// Pinned kinds survive application generation bumps
    pub fn is_pinned(&self) -> bool {
        matches!(self, NamespaceKind::Media | NamespaceKind::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::Media => "media",
            NamespaceKind::Image => "image",
            NamespaceKind::Static => "static",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespace identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNamespace {
    pub prefix: String,
    pub kind: NamespaceKind,
    pub generation: String,
}

impl CacheNamespace {
    pub fn new(
        prefix: impl Into<String>,
        kind: NamespaceKind,
        generation: impl Into<String>,
    ) -> Self {
        CacheNamespace {
            prefix: prefix.into(),
            kind,
            generation: generation.into(),
        }
    }

    /// Rendered store name
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.prefix, self.kind, self.generation)
    }
}

/// The current namespace of every kind, derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSet {
    pub prefix: String,
    pub media: CacheNamespace,
    pub image: CacheNamespace,
    pub statics: CacheNamespace,
}

impl NamespaceSet {
    pub fn from_config(config: &RelayConfig) -> Self {
        let prefix = config.namespace_prefix.clone();
        let namespace = |kind: NamespaceKind| {
            let generation = if kind.is_pinned() {
                &config.pinned_generation
            } else {
                &config.generation
            };
            CacheNamespace::new(&prefix, kind, generation)
        };
        NamespaceSet {
            media: namespace(NamespaceKind::Media),
            image: namespace(NamespaceKind::Image),
            statics: namespace(NamespaceKind::Static),
            prefix,
        }
    }

    pub fn current(&self, kind: NamespaceKind) -> &CacheNamespace {
        match kind {
            NamespaceKind::Media => &self.media,
            NamespaceKind::Image => &self.image,
            NamespaceKind::Static => &self.statics,
        }
    }

    /// Whether `name` belongs to this relay (shares its prefix)
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
    }

    /// Whether `name` is the current namespace of some kind
    pub fn is_current(&self, name: &str) -> bool {
        NamespaceKind::ALL
            .iter()
            .any(|kind| self.current(*kind).name() == name)
    }
}
