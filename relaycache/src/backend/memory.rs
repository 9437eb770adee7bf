//! In-process LRU memory backend with byte-budget admission and a periodic
//! TTL sweep (C3). Grounded on `rapina::cache::InMemoryCache`: a `DashMap`
//! keyed index, an `Instant`-based expiry/last-access pair per entry, and
//! eviction of the least-recently-used entry on overflow. Generalized here
//! from "cached HTTP response" to "arbitrary headers + body object", and the
//! single eviction-on-insert step is kept but driven by total resident
//! bytes rather than entry count (§4.2).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use http::HeaderMap;
use tokio::time::Instant;

use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::{
    BoxFuture, ByteStream, Backend, WriteStream, approx_header_size, capacity_error,
    single_chunk_stream,
};

struct Entry {
    headers: HeaderMap,
    body: Bytes,
    size: u64,
    expires_at: Instant,
    last_access: Instant,
}

/// Background sweep interval bounds (§4.2): `MaxTTL/8`, clamped to
/// `[1s, 1min]`.
fn sweep_interval(max_ttl: Duration) -> Duration {
    let eighth = max_ttl / 8;
    eighth.clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// In-process, byte-budgeted, TTL-enforcing object store.
pub struct MemoryBackend {
    entries: Arc<DashMap<Key, Entry>>,
    resident: Arc<AtomicU64>,
    limit_bytes: u64,
    max_ttl: Duration,
}

impl MemoryBackend {
    pub fn new(limit_bytes: u64, max_ttl: Duration) -> Arc<Self> {
        let backend = Arc::new(Self {
            entries: Arc::new(DashMap::new()),
            resident: Arc::new(AtomicU64::new(0)),
            limit_bytes,
            max_ttl,
        });
        backend.clone().spawn_sweeper();
        backend
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let interval = sweep_interval(self.max_ttl);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        });
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut freed = 0u64;
        self.entries.retain(|_, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                freed += entry.size;
            }
            keep
        });
        if freed > 0 {
            self.resident.fetch_sub(freed, Ordering::SeqCst);
        }
    }
}

impl Backend for MemoryBackend {
    fn open(&self, key: &Key) -> BoxFuture<'_, Result<(ByteStream, HeaderMap)>> {
        let key = *key;
        Box::pin(async move {
            let now = Instant::now();
            let Some(mut entry) = self.entries.get_mut(&key) else {
                return Err(CacheError::not_found(key.to_string()));
            };
            if entry.expires_at <= now {
                drop(entry);
                self.entries.remove(&key);
                return Err(CacheError::not_found(key.to_string()));
            }
            entry.last_access = now;
            Ok((single_chunk_stream(entry.body.clone()), entry.headers.clone()))
        })
    }

    fn stat(&self, key: &Key) -> BoxFuture<'_, Result<HeaderMap>> {
        let key = *key;
        Box::pin(async move {
            let now = Instant::now();
            match self.entries.get(&key) {
                Some(entry) if entry.expires_at > now => Ok(entry.headers.clone()),
                _ => Err(CacheError::not_found(key.to_string())),
            }
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
        Box::pin(async move {
            Ok(Box::new(MemoryWriteStream {
                backend: self.clone_handle(),
                key,
                headers,
                effective_ttl,
                buf: Vec::new(),
            }) as Box<dyn WriteStream>)
        })
    }

    fn delete(&self, key: &Key) -> BoxFuture<'_, Result<()>> {
        let key = *key;
        Box::pin(async move {
            match self.entries.remove(&key) {
                Some((_, entry)) => {
                    self.resident.fetch_sub(entry.size, Ordering::SeqCst);
                    Ok(())
                }
                None => Err(CacheError::not_found(key.to_string())),
            }
        })
    }

    fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    fn max_ttl(&self) -> Duration {
        self.max_ttl
    }
}

impl MemoryBackend {
    /// Used only to hand the write stream a self-reference without making
    /// `Backend::create` generic over `Arc<Self>`; backends are always
    /// constructed and held behind an `Arc` by the caller (§5: "C3 and C4
    /// protect their index with a single mutex" — here, `DashMap`'s shards).
    fn clone_handle(&self) -> MemoryHandle {
        MemoryHandle {
            entries: self.entries.clone(),
            resident: self.resident.clone(),
            limit_bytes: self.limit_bytes,
        }
    }
}

#[derive(Clone)]
struct MemoryHandle {
    entries: Arc<DashMap<Key, Entry>>,
    resident: Arc<AtomicU64>,
    limit_bytes: u64,
}

impl MemoryHandle {
    fn evict_for(&self, incoming: u64) {
        if self.limit_bytes == 0 {
            return;
        }
        while self.resident.load(Ordering::SeqCst) + incoming > self.limit_bytes {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| (e.value().last_access, e.value().expires_at))
                .map(|e| *e.key());
            let Some(key) = victim else { break };
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.resident.fetch_sub(entry.size, Ordering::SeqCst);
            }
        }
    }
}

struct MemoryWriteStream {
    backend: MemoryHandle,
    key: Key,
    headers: HeaderMap,
    effective_ttl: Duration,
    buf: Vec<Bytes>,
}

impl WriteStream for MemoryWriteStream {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        self.buf.push(chunk);
        Box::pin(async { Ok(()) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let body: Bytes = self.buf.concat().into();
            let size = body.len() as u64 + approx_header_size(&self.headers) as u64;

            if self.backend.limit_bytes > 0 && size > self.backend.limit_bytes {
                return Err(capacity_error(&self.key, size as usize, self.backend.limit_bytes));
            }

            self.backend.evict_for(size);

            let now = Instant::now();
            let entry = Entry {
                headers: self.headers,
                body,
                size,
                expires_at: now + self.effective_ttl,
                last_access: now,
            };
            if let Some(old) = self.backend.entries.insert(self.key, entry) {
                self.backend.resident.fetch_sub(old.size, Ordering::SeqCst);
            }
            self.backend.resident.fetch_add(size, Ordering::SeqCst);
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{create_from_bytes, open_to_bytes};

    fn headers(ct: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("content-type", ct.parse().unwrap());
        h
    }

    #[tokio::test]
    async fn round_trip() {
        let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(3600));
        let key = Key::from_bytes("hello-key");
        create_from_bytes(
            backend.as_ref(),
            &key,
            headers("text/plain"),
            Duration::ZERO,
            Bytes::from_static(b"hello"),
        )
        .await
        .unwrap();

        let (body, hdrs) = open_to_bytes(backend.as_ref(), &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert_eq!(hdrs.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let backend = MemoryBackend::new(1024 * 1024, Duration::from_millis(100));
        let key = Key::from_bytes("expiring");
        create_from_bytes(
            backend.as_ref(),
            &key,
            HeaderMap::new(),
            Duration::from_millis(50),
            Bytes::from_static(b"x"),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let err = open_to_bytes(backend.as_ref(), &key).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn overwrite_replaces_atomically() {
        let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(60));
        let key = Key::from_bytes("k");
        create_from_bytes(
            backend.as_ref(),
            &key,
            HeaderMap::new(),
            Duration::ZERO,
            Bytes::from_static(b"v1"),
        )
        .await
        .unwrap();
        create_from_bytes(
            backend.as_ref(),
            &key,
            HeaderMap::new(),
            Duration::ZERO,
            Bytes::from_static(b"v2"),
        )
        .await
        .unwrap();

        let (body, _) = open_to_bytes(backend.as_ref(), &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn capacity_is_enforced_after_every_create() {
        let backend = MemoryBackend::new(16, Duration::from_secs(60));
        for i in 0..10 {
            let key = Key::from_bytes(format!("k{i}"));
            let _ = create_from_bytes(
                backend.as_ref(),
                &key,
                HeaderMap::new(),
                Duration::ZERO,
                Bytes::from_static(b"12345678"),
            )
            .await;
            assert!(backend.resident.load(Ordering::SeqCst) <= 16);
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent_not_found() {
        let backend = MemoryBackend::new(1024, Duration::from_secs(60));
        let key = Key::from_bytes("absent");
        let err = backend.delete(&key).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
