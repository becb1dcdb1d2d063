//! Durable cache store implementations.

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Durable keyed store consumed by the response cache.
///
/// Payloads are opaque bytes; TTL handling is the store's responsibility so
/// that an expired entry is never returned by `get`. Implementations must
/// tolerate interleaved reads and writes of independent entries without a
/// global lock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn len(&self) -> Result<usize>;
    /// Drop expired entries, then trim least-recently-written entries until
    /// at most `max_entries` remain. Returns how many entries were removed.
    async fn cleanup(&self, max_entries: usize) -> Result<u64>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: u64,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at != 0 && now_millis() >= self.expires_at
    }
}

/// In-memory store. Durable only for the life of the process; used by tests
/// and as a stand-in when no storage location is configured.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, StoredValue>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(v) if v.is_expired() => true,
                Some(v) => return Ok(Some(v.data.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().unwrap().remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_millis() + ttl.as_millis() as u64
        };
        self.entries.write().unwrap().insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().unwrap().remove(key).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|v| !v.is_expired())
            .count())
    }

    async fn cleanup(&self, max_entries: usize) -> Result<u64> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired());
        while entries.len() > max_entries {
            // Oldest expiry approximates least-recently-written here.
            let oldest = entries
                .iter()
                .min_by_key(|(_, v)| v.expires_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
        Ok((before - entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// File-backed store: one file per entry under a spool directory.
///
/// Entry format is an 8-byte big-endian expiry timestamp (unix millis, 0 for
/// no expiry) followed by the raw payload. Writes go through a temp file and
/// an atomic rename so concurrent readers never observe a torn entry. Keys
/// are expected to be hex digests and are used as file names directly.
pub struct FileStore {
    dir: PathBuf,
}

const ENTRY_SUFFIX: &str = ".entry";

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, ENTRY_SUFFIX))
    }

    fn decode(bytes: Vec<u8>) -> Option<(u64, Vec<u8>)> {
        if bytes.len() < 8 {
            return None;
        }
        let mut header = [0u8; 8];
        header.copy_from_slice(&bytes[..8]);
        Some((u64::from_be_bytes(header), bytes[8..].to_vec()))
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(ENTRY_SUFFIX))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(bytes) {
            Some((expires_at, data)) => {
                if expires_at != 0 && now_millis() >= expires_at {
                    let _ = tokio::fs::remove_file(&path).await;
                    Ok(None)
                } else {
                    Ok(Some(data))
                }
            }
            // Truncated entry, drop it rather than serving garbage.
            None => {
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at: u64 = if ttl.is_zero() {
            0
        } else {
            now_millis() + ttl.as_millis() as u64
        };
        let mut bytes = Vec::with_capacity(8 + value.len());
        bytes.extend_from_slice(&expires_at.to_be_bytes());
        bytes.extend_from_slice(value);

        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.entry_path(key)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut live = 0usize;
        for path in self.entry_files().await? {
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Some((expires_at, _)) = Self::decode(bytes) {
                    if expires_at == 0 || now_millis() < expires_at {
                        live += 1;
                    }
                }
            }
        }
        Ok(live)
    }

    async fn cleanup(&self, max_entries: usize) -> Result<u64> {
        let mut removed = 0u64;
        let mut live: Vec<(PathBuf, SystemTime)> = Vec::new();

        for path in self.entry_files().await? {
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            match Self::decode(bytes) {
                Some((expires_at, _)) if expires_at != 0 && now_millis() >= expires_at => {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
                Some(_) => {
                    let modified = tokio::fs::metadata(&path)
                        .await
                        .and_then(|m| m.modified())
                        .unwrap_or(UNIX_EPOCH);
                    live.push((path, modified));
                }
                None => {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }

        if live.len() > max_entries {
            live.sort_by_key(|(_, modified)| *modified);
            let excess = live.len() - max_entries;
            for (path, _) in live.into_iter().take(excess) {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// No-op store: every lookup misses, nothing persists.
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for NullStore {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn put(&self, _: &str, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    async fn cleanup(&self, _: usize) -> Result<u64> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ai-optimizer-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_expiry() {
        let store = MemoryStore::new();
        store
            .put("k1", b"payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k1").await.unwrap().as_deref(), Some(&b"payload"[..]));

        store.put("k2", b"gone", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k2").await.unwrap().is_none());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        store
            .put("aabbcc", b"cached response", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("aabbcc").await.unwrap().as_deref(),
            Some(&b"cached response"[..])
        );
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.delete("aabbcc").await.unwrap());
        assert!(store.get("aabbcc").await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_expired_entry_misses() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        store
            .put("deadbeef", b"stale", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("deadbeef").await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = temp_dir();
        {
            let store = FileStore::new(&dir).unwrap();
            store
                .put("cafe01", b"persisted", Duration::from_secs(60))
                .await
                .unwrap();
        }
        let reopened = FileStore::new(&dir).unwrap();
        assert_eq!(
            reopened.get("cafe01").await.unwrap().as_deref(),
            Some(&b"persisted"[..])
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_cleanup_trims_to_capacity() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        for i in 0..5 {
            store
                .put(&format!("key{}", i), b"x", Duration::from_secs(60))
                .await
                .unwrap();
            // Distinct mtimes so trim order is stable.
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        let removed = store.cleanup(2).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.len().await.unwrap(), 2);
        // The most recently written entries survive.
        assert!(store.get("key4").await.unwrap().is_some());
        assert!(store.get("key3").await.unwrap().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_null_store_never_stores() {
        let store = NullStore::new();
        store.put("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
