//! Namespace lifecycle: install-time precache and activation cleanup

use crate::error::Result;
use crate::models::InterceptRequest;
use crate::namespace::NamespaceSet;
use crate::store::Store;
use crate::strategy::StaticStrategy;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of an activation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale namespaces that were removed
    pub deleted: Vec<String>,
    /// Namespaces under the prefix that are current and were left alone
    pub kept: Vec<String>,
}

/// Outcome of an install pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

pub struct NamespaceLifecycle {
    store: Arc<dyn Store>,
    namespaces: NamespaceSet,
    statics: Arc<StaticStrategy>,
    precache_urls: Vec<String>,
}

impl NamespaceLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        namespaces: NamespaceSet,
        statics: Arc<StaticStrategy>,
        precache_urls: Vec<String>,
    ) -> Self {
        NamespaceLifecycle {
            store,
            namespaces,
            statics,
            precache_urls,
        }
    }

    /// Precache the configured core assets into the current static namespace
    ///
    /// Individual failures are logged and reported; installation itself
    /// never fails.
    pub async fn install(&self) -> InstallReport {
        info!(
            "Installing: precaching {} assets into {}",
            self.precache_urls.len(),
            self.namespaces.statics.name()
        );

        let mut report = InstallReport::default();
        for url in &self.precache_urls {
            let outcome = match InterceptRequest::get(url) {
                Ok(request) => self.statics.fetch_and_store(&request).await.map(|r| r.status),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(status) if status.is_success() => report.cached.push(url.clone()),
                Ok(status) => {
                    warn!("Precache of {} answered {}", url, status);
                    report.failed.push(url.clone());
                }
                Err(e) => {
                    warn!("Precache of {} failed: {}", url, e);
                    report.failed.push(url.clone());
                }
            }
        }

        info!(
            "Install complete: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    /// Delete every namespace under the prefix that is not current
    ///
    /// Names outside the prefix belong to someone else and are never touched.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let mut report = ActivationReport::default();

        for name in self.store.namespaces().await? {
            if !self.namespaces.owns(&name) {
                continue;
            }
            if self.namespaces.is_current(&name) {
                report.kept.push(name);
                continue;
            }

            match self.store.delete_namespace(&name).await {
                Ok(_) => {
                    info!("Deleted stale namespace: {}", name);
                    report.deleted.push(name);
                }
                Err(e) => warn!("Failed to delete stale namespace {}: {}", name, e),
            }
        }

        info!(
            "Activation complete: {} deleted, {} kept",
            report.deleted.len(),
            report.kept.len()
        );
        Ok(report)
    }
}
