//! Filesystem-backed object store with atomic writes and a size-budgeted
//! LRU index (C4). Layout under `Root` (§4.3):
//!
//! ```text
//! <Root>/
//!   objects/<hex[0:2]>/<hex>.dat    body
//!   objects/<hex[0:2]>/<hex>.meta   headers + expiresAt
//!   tmp/<random>                   in-flight writes
//! ```
//!
//! `Create` writes into `tmp/`, fsyncs the meta file, then renames both into
//! place — rename is the atomicity boundary (I2, and the Open Question in
//! §9: "recommended: yes" to fsyncing the meta before rename).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::{
    BoxFuture, ByteStream, Backend, WriteStream, approx_header_size, capacity_error,
    single_chunk_stream,
};

#[derive(Serialize, Deserialize)]
struct Meta {
    headers: Vec<(String, String)>,
    expires_at_unix_ms: u64,
}

fn to_unix_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn vec_to_headers(pairs: Vec<(String, String)>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

struct IndexEntry {
    size: u64,
    last_access: SystemTime,
}

/// In-memory index rebuilt at startup by scanning `objects/`.
struct Index {
    entries: DashMap<Key, IndexEntry>,
    resident: AtomicU64,
}

pub struct DiskBackend {
    root: PathBuf,
    index: Arc<Index>,
    limit_bytes: u64,
    max_ttl: Duration,
}

impl DiskBackend {
    /// Opens (or initializes) a disk-backed store rooted at `root`,
    /// rebuilding its capacity index by scanning `objects/` and removing
    /// orphaned `tmp/` files left by a prior crash (§4.3 Failure modes).
    pub async fn open(root: impl Into<PathBuf>, limit_bytes: u64, max_ttl: Duration) -> Result<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("tmp")).await?;

        let index = Arc::new(Index {
            entries: DashMap::new(),
            resident: AtomicU64::new(0),
        });
        Self::rebuild_index(&root, &index).await?;
        Self::clean_tmp(&root).await?;

        Ok(Arc::new(Self {
            root,
            index,
            limit_bytes,
            max_ttl,
        }))
    }

    async fn clean_tmp(root: &Path) -> Result<()> {
        let mut dir = fs::read_dir(root.join("tmp")).await?;
        while let Some(entry) = dir.next_entry().await? {
            let _ = fs::remove_file(entry.path()).await;
        }
        Ok(())
    }

    async fn rebuild_index(root: &Path, index: &Index) -> Result<()> {
        let objects_dir = root.join("objects");
        let mut shard_iter = fs::read_dir(&objects_dir).await?;
        while let Some(shard) = shard_iter.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut file_iter = fs::read_dir(shard.path()).await?;
            while let Some(file) = file_iter.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let hex = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                let Some(key) = hex_to_key(hex) else { continue };
                let dat_path = path.with_extension("dat");
                match fs::metadata(&dat_path).await {
                    Ok(dat_meta) => {
                        let mtime = dat_meta.modified().unwrap_or(SystemTime::now());
                        let size = dat_meta.len();
                        index.entries.insert(key, IndexEntry { size, last_access: mtime });
                        index.resident.fetch_add(size, Ordering::SeqCst);
                    }
                    Err(_) => {
                        // meta present but dat missing: orphan, reap both (§4.3).
                        let _ = fs::remove_file(&path).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn dat_path(&self, key: &Key) -> PathBuf {
        dat_path_under(&self.root, key)
    }

    fn meta_path(&self, key: &Key) -> PathBuf {
        meta_path_under(&self.root, key)
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp").join(uuid::Uuid::new_v4().to_string())
    }
}

fn shard_dir_under(root: &Path, key: &Key) -> PathBuf {
    root.join("objects").join(key.shard_prefix())
}

fn dat_path_under(root: &Path, key: &Key) -> PathBuf {
    shard_dir_under(root, key).join(format!("{}.dat", key.to_hex()))
}

fn meta_path_under(root: &Path, key: &Key) -> PathBuf {
    shard_dir_under(root, key).join(format!("{}.meta", key.to_hex()))
}

fn hex_to_key(hex: &str) -> Option<Key> {
    if hex.len() != crate::key::KEY_LEN * 2 {
        return None;
    }
    Some(Key::parse(hex))
}

impl Backend for DiskBackend {
    fn open(&self, key: &Key) -> BoxFuture<'_, Result<(ByteStream, HeaderMap)>> {
        let key = *key;
        Box::pin(async move {
            let meta_bytes = fs::read(self.meta_path(&key))
                .await
                .map_err(|_| CacheError::not_found(key.to_string()))?;
            let meta: Meta = serde_json::from_slice(&meta_bytes)
                .map_err(|e| CacheError::internal(format!("corrupt meta for {key}: {e}")))?;

            let now = to_unix_ms(SystemTime::now());
            if meta.expires_at_unix_ms <= now {
                let _ = fs::remove_file(self.meta_path(&key)).await;
                let _ = fs::remove_file(self.dat_path(&key)).await;
                return Err(CacheError::not_found(key.to_string()));
            }

            let body = match fs::read(self.dat_path(&key)).await {
                Ok(body) => body,
                Err(_) => {
                    // meta present but dat missing: treat as not-found, reap meta too.
                    let _ = fs::remove_file(self.meta_path(&key)).await;
                    self.index.entries.remove(&key);
                    return Err(CacheError::not_found(key.to_string()));
                }
            };
            if let Some(mut entry) = self.index.entries.get_mut(&key) {
                entry.last_access = SystemTime::now();
            }

            Ok((single_chunk_stream(Bytes::from(body)), vec_to_headers(meta.headers)))
        })
    }

    fn stat(&self, key: &Key) -> BoxFuture<'_, Result<HeaderMap>> {
        let key = *key;
        Box::pin(async move {
            let meta_bytes = fs::read(self.meta_path(&key))
                .await
                .map_err(|_| CacheError::not_found(key.to_string()))?;
            let meta: Meta = serde_json::from_slice(&meta_bytes)
                .map_err(|e| CacheError::internal(format!("corrupt meta for {key}: {e}")))?;
            let now = to_unix_ms(SystemTime::now());
            if meta.expires_at_unix_ms <= now {
                return Err(CacheError::not_found(key.to_string()));
            }
            Ok(vec_to_headers(meta.headers))
        })
    }

    fn create(
        &self,
        key: &Key,
        headers: HeaderMap,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Box<dyn WriteStream>>> {
        let key = *key;
        let effective_ttl = self.effective_ttl(ttl);
        let tmp_dat = self.tmp_path();
        let tmp_meta = self.tmp_path();
        Box::pin(async move {
            let file = fs::File::create(&tmp_dat).await?;
            Ok(Box::new(DiskWriteStream {
                root: self.root.clone(),
                index: self.index.clone(),
                limit_bytes: self.limit_bytes,
                key,
                headers,
                effective_ttl,
                tmp_dat,
                tmp_meta,
                file,
                written: 0,
            }) as Box<dyn WriteStream>)
        })
    }

    fn delete(&self, key: &Key) -> BoxFuture<'_, Result<()>> {
        let key = *key;
        Box::pin(async move {
            if self.index.entries.remove(&key).is_none()
                && fs::metadata(self.meta_path(&key)).await.is_err()
            {
                return Err(CacheError::not_found(key.to_string()));
            }
            let _ = fs::remove_file(self.dat_path(&key)).await;
            let _ = fs::remove_file(self.meta_path(&key)).await;
            Ok(())
        })
    }

    fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    fn max_ttl(&self) -> Duration {
        self.max_ttl
    }
}

struct DiskWriteStream {
    root: PathBuf,
    index: Arc<Index>,
    limit_bytes: u64,
    key: Key,
    headers: HeaderMap,
    effective_ttl: Duration,
    tmp_dat: PathBuf,
    tmp_meta: PathBuf,
    file: fs::File,
    written: u64,
}

impl DiskWriteStream {
    fn shard_dir(&self) -> PathBuf {
        shard_dir_under(&self.root, &self.key)
    }

    fn dat_path(&self) -> PathBuf {
        dat_path_under(&self.root, &self.key)
    }

    fn meta_path(&self) -> PathBuf {
        meta_path_under(&self.root, &self.key)
    }
}

impl WriteStream for DiskWriteStream {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.file.write_all(&chunk).await?;
            self.written += chunk.len() as u64;
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let result: Result<()> = async {
                self.file.flush().await?;
                self.file.sync_all().await?;

                let size = self.written + approx_header_size(&self.headers) as u64;
                if self.limit_bytes > 0 && size > self.limit_bytes {
                    return Err(capacity_error(&self.key, size as usize, self.limit_bytes));
                }

                let meta = Meta {
                    headers: headers_to_vec(&self.headers),
                    expires_at_unix_ms: to_unix_ms(SystemTime::now() + self.effective_ttl),
                };
                let meta_bytes = serde_json::to_vec(&meta)
                    .map_err(|e| CacheError::internal(format!("encoding meta: {e}")))?;
                let mut meta_file = fs::File::create(&self.tmp_meta).await?;
                meta_file.write_all(&meta_bytes).await?;
                meta_file.flush().await?;
                meta_file.sync_all().await?;
                drop(meta_file);

                fs::create_dir_all(self.shard_dir()).await?;

                // Evict to make room, after the write already landed in tmp/ so
                // a concurrent reader of the old entry is unaffected until rename.
                evict_for(&self.root, &self.index, self.limit_bytes, size).await;

                // Rename body before meta: a crash between leaves at worst an
                // orphan dat with no meta, which the next startup scan ignores;
                // it never leaves a meta pointing at a missing dat file.
                fs::rename(&self.tmp_dat, self.dat_path()).await?;
                fs::rename(&self.tmp_meta, self.meta_path()).await?;

                let now = SystemTime::now();
                if let Some(old) = self.index.entries.insert(self.key, IndexEntry { size, last_access: now }) {
                    self.index.resident.fetch_sub(old.size, Ordering::SeqCst);
                }
                self.index.resident.fetch_add(size, Ordering::SeqCst);
                Ok(())
            }
            .await;

            if result.is_err() {
                let _ = fs::remove_file(&self.tmp_dat).await;
                let _ = fs::remove_file(&self.tmp_meta).await;
            }
            result
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let _ = fs::remove_file(&self.tmp_dat).await;
            let _ = fs::remove_file(&self.tmp_meta).await;
        })
    }
}

async fn evict_for(root: &Path, index: &Index, limit_bytes: u64, incoming: u64) {
    if limit_bytes == 0 {
        return;
    }
    while index.resident.load(Ordering::SeqCst) + incoming > limit_bytes {
        let victim = index
            .entries
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| *e.key());
        let Some(key) = victim else { break };
        if let Some((_, entry)) = index.entries.remove(&key) {
            index.resident.fetch_sub(entry.size, Ordering::SeqCst);
            let _ = fs::remove_file(dat_path_under(root, &key)).await;
            let _ = fs::remove_file(meta_path_under(root, &key)).await;
            tracing::debug!(%key, "disk backend evicted entry for admission");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{create_from_bytes, open_to_bytes};

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path(), 0, Duration::from_secs(3600)).await.unwrap();
        let key = Key::from_bytes("disk-key");
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());

        create_from_bytes(backend.as_ref(), &key, headers, Duration::ZERO, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let (body, hdrs) = open_to_bytes(backend.as_ref(), &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert_eq!(hdrs.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path(), 0, Duration::from_millis(100)).await.unwrap();
        let key = Key::from_bytes("expiring");
        create_from_bytes(backend.as_ref(), &key, HeaderMap::new(), Duration::from_millis(30), Bytes::from_static(b"x"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let err = open_to_bytes(backend.as_ref(), &key).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::from_bytes("persisted");
        {
            let backend = DiskBackend::open(dir.path(), 0, Duration::from_secs(3600)).await.unwrap();
            create_from_bytes(backend.as_ref(), &key, HeaderMap::new(), Duration::ZERO, Bytes::from_static(b"v"))
                .await
                .unwrap();
        }
        let backend = DiskBackend::open(dir.path(), 0, Duration::from_secs(3600)).await.unwrap();
        let (body, _) = open_to_bytes(backend.as_ref(), &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn capacity_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path(), 16, Duration::from_secs(60)).await.unwrap();
        for i in 0..10 {
            let key = Key::from_bytes(format!("k{i}"));
            let _ = create_from_bytes(backend.as_ref(), &key, HeaderMap::new(), Duration::ZERO, Bytes::from_static(b"12345678"))
                .await;
            assert!(backend.index.resident.load(Ordering::SeqCst) <= 16);
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path(), 0, Duration::from_secs(60)).await.unwrap();
        let key = Key::from_bytes("absent");
        let err = backend.delete(&key).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
