//! Capacity enforcement for bounded namespaces

use crate::error::Result;
use crate::namespace::{NamespaceKind, NamespaceSet};
use crate::store::Store;
use tracing::{debug, warn};

/// Per-kind entry limits, oldest-inserted entries go first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub media_limit: usize,
    pub image_limit: usize,
}

impl EvictionPolicy {
    pub fn new(media_limit: usize, image_limit: usize) -> Self {
        EvictionPolicy {
            media_limit,
            image_limit,
        }
    }

    /// Entry limit for a kind; static namespaces are unbounded
    pub fn limit_for(&self, kind: NamespaceKind) -> Option<usize> {
        match kind {
            NamespaceKind::Media => Some(self.media_limit),
            NamespaceKind::Image => Some(self.image_limit),
            NamespaceKind::Static => None,
        }
    }

    /// Trim `namespace` down to `limit` entries
    ///
    /// Returns the number of entries removed. Entries that vanish between
    /// listing and deletion (a concurrent eviction or clear) are not errors.
    pub async fn enforce(store: &dyn Store, namespace: &str, limit: usize) -> Result<usize> {
        let keys = store.keys(namespace).await?;
        if keys.len() <= limit {
            return Ok(0);
        }

        let excess = keys.len() - limit;
        let mut removed = 0;
        for key in keys.iter().take(excess) {
            if store.delete(namespace, key).await? {
                removed += 1;
            }
        }

        debug!(
            "Evicted {} entries from {} (limit {})",
            removed, namespace, limit
        );
        Ok(removed)
    }

    /// Enforce the limit of the current namespace of `kind`
    ///
    /// Failures are logged and reported as zero removals: eviction is cleanup,
    /// it never fails the request that triggered it.
    pub async fn run(
        &self,
        store: &dyn Store,
        namespaces: &NamespaceSet,
        kind: NamespaceKind,
    ) -> usize {
        let Some(limit) = self.limit_for(kind) else {
            return 0;
        };

        let name = namespaces.current(kind).name();
        match Self::enforce(store, &name, limit).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Eviction failed for {}: {}", name, e);
                0
            }
        }
    }
}
