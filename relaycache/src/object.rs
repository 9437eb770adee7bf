//! The object store interface (C2): a uniform Open/Stat/Create/Delete over a
//! keyed blob + headers + TTL, dispatched as a trait object the way
//! `rapina::cache::CacheBackend` dispatches over boxed futures rather than
//! `async-trait` (§9 Design Notes: "implement it as a dispatch interface —
//! virtual table / trait object / tagged union").

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;

use crate::error::{CacheError, Result};
use crate::key::Key;

/// A boxed future, for trait-object compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed stream of body chunks. Backed by a single chunk for the memory
/// and disk backends (bodies are immutable buffers once committed); backed
/// by the real wire stream for the remote backend and for an upstream
/// response being teed into the cache (C8).
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync>>;

/// Turns an already-buffered body into a one-chunk [`ByteStream`].
pub fn single_chunk_stream(body: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(body) }))
}

/// A sink returned by [`Backend::create`]. Writes are accumulated until
/// [`WriteStream::close`] commits them atomically (I2); dropping the stream
/// or calling [`WriteStream::abort`] discards them (§4.1 cancellation).
pub trait WriteStream: Send {
    /// Appends a chunk of body bytes.
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Commits the object. No object becomes visible until this returns Ok.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    /// Discards all buffered bytes; no object is committed.
    fn abort(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// A container of objects with a byte-capacity budget and a maximum TTL
/// (the "Backend" of §3 DATA MODEL). Every concrete tier — memory, disk,
/// tiered composition, remote — implements this same interface; tiered
/// dispatch is itself a `Backend`, "no special-casing" (§9).
pub trait Backend: Send + Sync {
    /// `Open(ctx, key)`: the stream yields the body; closing it (dropping
    /// it) releases the reservation. Concurrent readers are permitted (I1).
    fn open(&self, key: &Key) -> BoxFuture<'_, Result<(ByteStream, HeaderMap)>>;

    /// `Stat(ctx, key)`: metadata without body transfer.
    fn stat(&self, key: &Key) -> BoxFuture<'_, Result<HeaderMap>>;

    /// `Create(ctx, key, headers, ttl)`: returns a sink; nothing is visible
    /// until the returned [`WriteStream`] is closed successfully (I2).
    fn create(
        &self,
        key: &Key,
        headers: HeaderMap,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Box<dyn WriteStream>>>;

    /// `Delete(ctx, key)`: idempotent; deleting an absent key is NotFound
    /// (I5).
    fn delete(&self, key: &Key) -> BoxFuture<'_, Result<()>>;

    /// Releases backend-global resources.
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// `LimitMB` converted to bytes; 0 means unbounded.
    fn limit_bytes(&self) -> u64;

    /// `MaxTTL`; a zero caller-supplied TTL means "use this value".
    fn max_ttl(&self) -> Duration;

    /// `effective_TTL = min(TTL or infinity, backend.MaxTTL)` (§3).
    fn effective_ttl(&self, requested: Duration) -> Duration {
        let max = self.max_ttl();
        if requested.is_zero() {
            max
        } else if max.is_zero() {
            requested
        } else {
            requested.min(max)
        }
    }
}

/// Reads a whole object into memory. Convenience wrapper over
/// [`Backend::open`] for callers (tests, the CLI, the snapshot restorer)
/// that need the full body rather than a stream.
pub async fn open_to_bytes(
    backend: &dyn Backend,
    key: &Key,
) -> Result<(Bytes, HeaderMap)> {
    use futures::StreamExt;

    let (mut stream, headers) = backend.open(key).await?;
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok((Bytes::from(buf), headers))
}

/// Writes a whole in-memory body through [`Backend::create`] in one shot.
pub async fn create_from_bytes(
    backend: &dyn Backend,
    key: &Key,
    headers: HeaderMap,
    ttl: Duration,
    body: Bytes,
) -> Result<()> {
    let mut writer = backend.create(key, headers, ttl).await?;
    if let Err(e) = writer.write(body).await {
        writer.abort().await;
        return Err(e);
    }
    writer.close().await
}

/// Approximates header byte size for admission accounting (§4.2 step 1).
pub fn approx_header_size(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

pub(crate) fn capacity_error(key: &Key, size: usize, limit: u64) -> CacheError {
    CacheError::Capacity(format!(
        "object {key} of {size} bytes exceeds backend capacity of {limit} bytes"
    ))
}
