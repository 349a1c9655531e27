//! File-backed store
//!
//! Layout: one directory per namespace under the root, one file per entry
//! named by the xxh3 hash of its key. An entry file is framed as
//!
//! ```text
//! [crc32 u32 LE][header_len u32 LE][bincode RecordHeader][bincode CacheEntry]
//! ```
//!
//! where the CRC covers everything after the first eight bytes. The header
//! carries the insertion sequence and the key, so the in-memory index can be
//! rebuilt on open without decoding any payload. Files that fail the checksum
//! or do not decode are logged, removed and reported as misses.

use crate::error::{RelayError, Result};
use crate::models::CacheEntry;
use crate::store::Store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "entry";
const FRAME_PREFIX: usize = 8;
/// Upper bound on an encoded header; anything larger is treated as corrupt
const MAX_HEADER_LEN: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    /// Insertion sequence, strictly increasing across the store's lifetime
    seq: u64,
    key: String,
}

/// Insertion order of one namespace
#[derive(Debug, Default)]
struct NamespaceIndex {
    by_key: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
}

impl NamespaceIndex {
    /// Record `key` at `seq`; an older sequence never displaces a newer one
    fn insert(&mut self, key: String, seq: u64) {
        if let Some(&old) = self.by_key.get(&key) {
            if old >= seq {
                return;
            }
            self.order.remove(&old);
        }
        self.order.insert(seq, key.clone());
        self.by_key.insert(key, seq);
    }

    fn remove(&mut self, key: &str) {
        if let Some(seq) = self.by_key.remove(key) {
            self.order.remove(&seq);
        }
    }
}

/// Persistent store rooted at a directory
pub struct FileStore {
    root: PathBuf,
    last_seq: AtomicU64,
    index: RwLock<HashMap<String, NamespaceIndex>>,
}

fn poisoned<T>(_: T) -> RelayError {
    RelayError::StoreError("file store index lock poisoned".to_string())
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// Every entry header is read once to rebuild the insertion-order index.
    /// Leftover temporary files from interrupted writes are removed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            RelayError::StoreError(format!("cannot create store root {:?}: {}", root, e))
        })?;

        let mut index = HashMap::new();
        let mut last_seq = 0;
        let mut reader = fs::read_dir(&root).await?;
        while let Some(item) = reader.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let ns_index = Self::scan_namespace(&item.path()).await?;
            if let Some((&seq, _)) = ns_index.order.last_key_value() {
                last_seq = last_seq.max(seq);
            }
            index.insert(name, ns_index);
        }

        let entries: usize = index.values().map(|ns: &NamespaceIndex| ns.by_key.len()).sum();
        info!(
            "File store opened at {:?}: {} namespaces, {} entries",
            root,
            index.len(),
            entries
        );

        Ok(FileStore {
            root,
            last_seq: AtomicU64::new(last_seq),
            index: RwLock::new(index),
        })
    }

    async fn scan_namespace(dir: &Path) -> Result<NamespaceIndex> {
        let mut ns_index = NamespaceIndex::default();
        let mut reader = fs::read_dir(dir).await?;

        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

            if extension.starts_with("tmp") {
                debug!("Removing interrupted write {:?}", path);
                remove_quietly(&path).await;
                continue;
            }
            if extension != ENTRY_EXTENSION {
                continue;
            }

            match Self::read_header(&path).await {
                Ok(header) => ns_index.insert(header.key, header.seq),
                Err(e) => {
                    warn!("Discarding unreadable store entry {:?}: {}", path, e);
                    remove_quietly(&path).await;
                }
            }
        }
        Ok(ns_index)
    }

    /// Next insertion sequence: wall-clock nanoseconds, forced monotonic
    fn next_seq(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut current = self.last_seq.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1);
            match self.last_seq.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        if namespace.is_empty()
            || namespace.contains(['/', '\\'])
            || namespace.starts_with('.')
        {
            return Err(RelayError::StoreError(format!(
                "invalid namespace name '{}'",
                namespace
            )));
        }
        Ok(self.root.join(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
        Ok(self
            .namespace_dir(namespace)?
            .join(format!("{:016x}.{}", hash, ENTRY_EXTENSION)))
    }

    fn encode(header: &RecordHeader, entry: &CacheEntry) -> Result<Vec<u8>> {
        let header_bytes = bincode::serialize(header)?;
        let entry_bytes = bincode::serialize(entry)?;

        let mut data = Vec::with_capacity(FRAME_PREFIX + header_bytes.len() + entry_bytes.len());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(&header_bytes);
        data.extend_from_slice(&entry_bytes);

        let checksum = crc32fast::hash(&data[4..]);
        data[..4].copy_from_slice(&checksum.to_le_bytes());
        Ok(data)
    }

    fn decode(path: &Path, data: &[u8]) -> Result<(RecordHeader, CacheEntry)> {
        let corrupt = |reason: String| RelayError::CorruptEntry {
            key: path.display().to_string(),
            reason,
        };

        if data.len() < FRAME_PREFIX {
            return Err(corrupt(format!("truncated file ({} bytes)", data.len())));
        }
        let expected = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let actual = crc32fast::hash(&data[4..]);
        if expected != actual {
            return Err(corrupt(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            )));
        }

        let header_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let body = &data[FRAME_PREFIX..];
        if header_len > body.len() {
            return Err(corrupt(format!("header length {} exceeds file", header_len)));
        }
        let (header_bytes, entry_bytes) = body.split_at(header_len);

        let header: RecordHeader = bincode::deserialize(header_bytes)
            .map_err(|e| corrupt(format!("header decode failed: {}", e)))?;
        let entry: CacheEntry = bincode::deserialize(entry_bytes)
            .map_err(|e| corrupt(format!("decode failed: {}", e)))?;
        Ok((header, entry))
    }

    /// Read only the frame prefix and header of an entry file
    async fn read_header(path: &Path) -> Result<RecordHeader> {
        let mut file = fs::File::open(path).await?;
        let mut prefix = [0u8; FRAME_PREFIX];
        file.read_exact(&mut prefix).await?;

        let header_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(RelayError::CorruptEntry {
                key: path.display().to_string(),
                reason: format!("header length {} too large", header_len),
            });
        }

        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes).await?;
        bincode::deserialize(&header_bytes).map_err(|e| RelayError::CorruptEntry {
            key: path.display().to_string(),
            reason: format!("header decode failed: {}", e),
        })
    }

    /// Read one record; corrupt files are removed and reported as absent
    async fn read_record(&self, path: &Path) -> Result<Option<(RecordHeader, CacheEntry)>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match Self::decode(path, &data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding corrupt store entry: {}", e);
                remove_quietly(path).await;
                Ok(None)
            }
        }
    }

    fn index_insert(&self, namespace: &str, key: String, seq: u64) -> Result<()> {
        let mut index = self.index.write().map_err(poisoned)?;
        index
            .entry(namespace.to_string())
            .or_default()
            .insert(key, seq);
        Ok(())
    }

    fn index_remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut index = self.index.write().map_err(poisoned)?;
        if let Some(ns_index) = index.get_mut(namespace) {
            ns_index.remove(key);
        }
        Ok(())
    }

    async fn write_file(tmp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(tmp, path).await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!("Failed to remove {:?}: {}", path, e);
    }
}

#[async_trait]
impl Store for FileStore {
    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut reader = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            if item.file_type().await?.is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let dir = self.namespace_dir(namespace)?;
        let removed = match fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.index.write().map_err(poisoned)?.remove(namespace);
        Ok(removed)
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(namespace, key)?;
        match self.read_record(&path).await? {
            // A hash collision reads as a miss rather than the wrong entry
            Some((_, entry)) if entry.key == key => Ok(Some(entry)),
            Some(_) => Ok(None),
            None => {
                self.index_remove(namespace, key)?;
                Ok(None)
            }
        }
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;

        let path = self.entry_path(namespace, &entry.key)?;
        let header = RecordHeader {
            seq: self.next_seq(),
            key: entry.key.clone(),
        };
        let data = Self::encode(&header, &entry)?;

        // Write then rename so readers never observe a half-written file
        let tmp = path.with_extension(format!("tmp{}", header.seq));
        if let Err(e) = Self::write_file(&tmp, &path, &data).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }

        debug!(
            "Stored entry on disk: namespace={}, key={}, size={}",
            namespace,
            header.key,
            data.len()
        );
        self.index_insert(namespace, header.key, header.seq)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let path = self.entry_path(namespace, key)?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.index_remove(namespace, key)?;
        Ok(removed)
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index
            .get(namespace)
            .map(|ns| ns.order.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, namespace: &str) -> Result<usize> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.get(namespace).map(|ns| ns.by_key.len()).unwrap_or(0))
    }
}
