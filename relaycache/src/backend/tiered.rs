//! Read-through/write-through composition over an ordered list of backends
//! (C5). Tiered dispatch is itself a [`Backend`] — "no special-casing"
//! (§9 Design Notes).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::HeaderMap;

use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::{BoxFuture, ByteStream, Backend, WriteStream, single_chunk_stream};

/// Composes `[T0, T1, ..., Tn-1]`, fastest/smallest first (§4.4).
pub struct TieredBackend {
    tiers: Vec<Arc<dyn Backend>>,
}

/// `MaybeNewTiered([t])` collapses to `t` (§4.4); this constructor returns
/// the single backend unwrapped from its `Arc` rather than wrapping it.
pub fn maybe_new_tiered(tiers: Vec<Arc<dyn Backend>>) -> Arc<dyn Backend> {
    if tiers.len() == 1 {
        tiers.into_iter().next().unwrap()
    } else {
        Arc::new(TieredBackend { tiers })
    }
}

impl TieredBackend {
    pub fn new(tiers: Vec<Arc<dyn Backend>>) -> Self {
        Self { tiers }
    }

    /// Streams a copy of `body` into each tier above `below`, best-effort:
    /// a failed promotion does not fail the read (§4.4).
    async fn promote(&self, key: &Key, headers: &HeaderMap, body: &Bytes, below: usize) {
        for tier in &self.tiers[..below] {
            let ttl = tier.max_ttl();
            match tier.create(key, headers.clone(), ttl).await {
                Ok(mut writer) => {
                    if let Err(e) = writer.write(body.clone()).await {
                        tracing::debug!(%key, error = %e, "tier promotion write failed");
                        writer.abort().await;
                        continue;
                    }
                    if let Err(e) = writer.close().await {
                        tracing::debug!(%key, error = %e, "tier promotion commit failed");
                    }
                }
                Err(e) => tracing::debug!(%key, error = %e, "tier promotion create failed"),
            }
        }
    }
}

impl Backend for TieredBackend {
    fn open(&self, key: &Key) -> BoxFuture<'_, Result<(ByteStream, HeaderMap)>> {
        let key = *key;
        Box::pin(async move {
            for (i, tier) in self.tiers.iter().enumerate() {
                match tier.open(&key).await {
                    Ok((mut stream, headers)) => {
                        let mut buf = Vec::new();
                        while let Some(chunk) = stream.next().await {
                            buf.extend_from_slice(&chunk?);
                        }
                        let body = Bytes::from(buf);
                        if i > 0 {
                            self.promote(&key, &headers, &body, i).await;
                        }
                        return Ok((single_chunk_stream(body), headers));
                    }
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(CacheError::not_found(key.to_string()))
        })
    }

    fn stat(&self, key: &Key) -> BoxFuture<'_, Result<HeaderMap>> {
        let key = *key;
        Box::pin(async move {
            for tier in &self.tiers {
                match tier.stat(&key).await {
                    Ok(headers) => return Ok(headers),
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(CacheError::not_found(key.to_string()))
        })
    }

    fn create(
        &self,
        key: &Key,
        headers: HeaderMap,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Box<dyn WriteStream>>> {
        let key = *key;
        Box::pin(async move {
            let mut writers = Vec::with_capacity(self.tiers.len());
            for tier in &self.tiers {
                writers.push(tier.create(&key, headers.clone(), ttl).await?);
            }
            Ok(Box::new(TieredWriteStream {
                tiers: self.tiers.clone(),
                key,
                writers,
            }) as Box<dyn WriteStream>)
        })
    }

    fn delete(&self, key: &Key) -> BoxFuture<'_, Result<()>> {
        let key = *key;
        Box::pin(async move {
            let mut any_found = false;
            for tier in &self.tiers {
                match tier.delete(&key).await {
                    Ok(()) => any_found = true,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            if any_found {
                Ok(())
            } else {
                Err(CacheError::not_found(key.to_string()))
            }
        })
    }

    fn limit_bytes(&self) -> u64 {
        self.tiers.last().map(|t| t.limit_bytes()).unwrap_or(0)
    }

    fn max_ttl(&self) -> Duration {
        self.tiers
            .iter()
            .map(|t| t.max_ttl())
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Write-through: succeeds iff every tier's writer closes without error.
/// Partial success is rolled back by deleting the succeeded tiers
/// (best-effort, §4.4).
struct TieredWriteStream {
    tiers: Vec<Arc<dyn Backend>>,
    key: Key,
    writers: Vec<Box<dyn WriteStream>>,
}

impl WriteStream for TieredWriteStream {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for writer in &mut self.writers {
                writer.write(chunk.clone()).await?;
            }
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let mut succeeded = Vec::new();
            let mut first_error = None;
            for (tier, writer) in self.tiers.iter().zip(self.writers) {
                match writer.close().await {
                    Ok(()) => succeeded.push(tier.clone()),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(err) = first_error {
                for tier in succeeded {
                    let _ = tier.delete(&self.key).await;
                }
                return Err(err);
            }
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            for writer in self.writers {
                writer.abort().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::object::{create_from_bytes, open_to_bytes};

    #[tokio::test]
    async fn promotes_hit_from_lower_tier_to_tier_zero() {
        let tier0 = MemoryBackend::new(8, Duration::from_secs(60));
        let tier1 = MemoryBackend::new(1024, Duration::from_secs(60));
        let tiered = TieredBackend::new(vec![tier0.clone(), tier1.clone()]);

        let key = Key::from_bytes("promoted");
        create_from_bytes(tier1.as_ref(), &key, HeaderMap::new(), Duration::ZERO, Bytes::from_static(b"v"))
            .await
            .unwrap();

        // Not present in tier0 yet.
        assert!(tier0.open(&key).await.is_err());

        let (body, _) = open_to_bytes(&tiered, &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"v"));

        // Now tier0 has it without consulting tier1 again (P5).
        assert!(tier0.open(&key).await.is_ok());
    }

    #[tokio::test]
    async fn create_writes_through_every_tier() {
        let tier0 = MemoryBackend::new(1024, Duration::from_secs(60));
        let tier1 = MemoryBackend::new(1024, Duration::from_secs(60));
        let tiered = TieredBackend::new(vec![tier0.clone(), tier1.clone()]);

        let key = Key::from_bytes("both");
        create_from_bytes(&tiered, &key, HeaderMap::new(), Duration::ZERO, Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert!(tier0.open(&key).await.is_ok());
        assert!(tier1.open(&key).await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_not_found_only_if_every_tier_misses() {
        let tier0 = MemoryBackend::new(1024, Duration::from_secs(60));
        let tier1 = MemoryBackend::new(1024, Duration::from_secs(60));
        let tiered = TieredBackend::new(vec![tier0, tier1]);
        let key = Key::from_bytes("absent");
        let err = tiered.delete(&key).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn single_tier_collapses() {
        let tier0 = MemoryBackend::new(1024, Duration::from_secs(60));
        let collapsed = maybe_new_tiered(vec![tier0.clone()]);
        assert!(Arc::ptr_eq(&(tier0 as Arc<dyn Backend>), &collapsed));
    }
}
