//! Namespaced entry storage
//!
//! A [`Store`] is a set of named namespaces, each a key → [`CacheEntry`]
//! table that remembers insertion order. Replacing an entry counts as a new
//! insertion. Implementations are shared between concurrent requests without
//! any cross-request locking: concurrent writes to one key are
//! last-writer-wins.

use crate::error::Result;
use crate::models::CacheEntry;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;

/// Storage backend for cached entries
#[async_trait]
pub trait Store: Send + Sync {
    /// Names of all existing namespaces
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Delete a namespace and everything in it; `Ok(false)` if it did not exist
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;

    /// Look up one entry
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry, creating the namespace if needed
    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()>;

    /// Remove one entry; `Ok(false)` if it was absent
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Keys of a namespace, oldest insertion first
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Number of entries in a namespace
    async fn len(&self, namespace: &str) -> Result<usize> {
        Ok(self.keys(namespace).await?.len())
    }
}

#[derive(Default)]
struct MemoryNamespace {
    entries: HashMap<String, (u64, CacheEntry)>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl MemoryNamespace {
    fn insert(&mut self, entry: CacheEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = entry.key.clone();
        if let Some((old_seq, _)) = self.entries.insert(key.clone(), (seq, entry)) {
            self.order.remove(&old_seq);
        }
        self.order.insert(seq, key);
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((seq, _)) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }
}

/// In-memory store; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, MemoryNamespace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> crate::error::RelayError {
    crate::error::RelayError::StoreError("memory store lock poisoned".to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn namespaces(&self) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let mut names: Vec<String> = namespaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        Ok(namespaces.remove(namespace).is_some())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces
            .get(namespace)
            .and_then(|ns| ns.entries.get(key))
            .map(|(_, entry)| entry.clone()))
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()> {
        debug!(
            "Storing entry: namespace={}, key={}, size={}",
            namespace,
            entry.key,
            entry.body.len()
        );
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(entry);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        Ok(namespaces
            .get_mut(namespace)
            .map(|ns| ns.remove(key))
            .unwrap_or(false))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces
            .get(namespace)
            .map(|ns| ns.order.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, namespace: &str) -> Result<usize> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces.get(namespace).map(|ns| ns.entries.len()).unwrap_or(0))
    }
}
