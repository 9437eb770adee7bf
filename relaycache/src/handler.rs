//! Read-through caching HTTP handler (C8): consults the cache on every
//! request, falls back to an upstream fetch on miss, and tees the upstream
//! response into both the client socket and a cache writer. Grounded on
//! `rapina`'s request-handling layer (configuration-via-chained-builder,
//! `tracing` spans per request) generalized from routing a typed API to
//! proxying an arbitrary upstream (§4.7).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::mpsc;

use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::Backend;
use crate::response::{Body, error_response, stream_body};

/// Adapts an unbounded mpsc receiver into a [`Stream`], avoiding a
/// dependency on `tokio-stream` for this one conversion.
fn receiver_stream<T>(mut rx: mpsc::UnboundedReceiver<T>) -> impl Stream<Item = T> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

/// A view of the inbound request exposed to `CacheKey`/`Transform`/`TTL`;
/// the real `hyper::Request<Incoming>` is consumed to collect its body, so
/// callers get this plain-data snapshot instead (§4.7 configuration knobs).
pub struct RequestView {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type CacheKeyFn = dyn Fn(&RequestView) -> String + Send + Sync;
pub type TransformFn = dyn Fn(&RequestView) -> Result<Request<Full<Bytes>>> + Send + Sync;
pub type TtlFn = dyn Fn(&RequestView) -> Duration + Send + Sync;
pub type OnErrorFn = dyn Fn(&CacheError) -> Response<Body> + Send + Sync;

/// Default `CacheKey`: the request URL as a string (§4.7 step 1).
fn default_cache_key(view: &RequestView) -> String {
    view.uri.to_string()
}

/// Default `Transform`: forward the request verbatim.
fn default_transform(view: &RequestView) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder().method(view.method.clone()).uri(view.uri.clone());
    for (name, value) in view.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(view.body.clone()))
        .map_err(|e| CacheError::internal(e.to_string()))
}

/// Default `OnError`: map to 500, unless the error is already classified.
fn default_on_error(err: &CacheError) -> Response<Body> {
    error_response(err)
}

/// Default `TTL`: zero, meaning "use the backend's `MaxTTL`" (§3).
fn default_ttl(_view: &RequestView) -> Duration {
    Duration::ZERO
}

/// Read-through proxy in front of a [`Backend`] (C8). Configuration knobs
/// each return `self` for chaining, as the spec enumerates them.
pub struct CachingHandler {
    backend: Arc<dyn Backend>,
    client: Client<HttpConnector, Full<Bytes>>,
    cache_key: Box<CacheKeyFn>,
    transform: Box<TransformFn>,
    ttl: Box<TtlFn>,
    on_error: Box<OnErrorFn>,
}

impl CachingHandler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            cache_key: Box::new(default_cache_key),
            transform: Box::new(default_transform),
            ttl: Box::new(default_ttl),
            on_error: Box::new(default_on_error),
        }
    }

    pub fn cache_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestView) -> String + Send + Sync + 'static,
    {
        self.cache_key = Box::new(f);
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestView) -> Result<Request<Full<Bytes>>> + Send + Sync + 'static,
    {
        self.transform = Box::new(f);
        self
    }

    pub fn ttl<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestView) -> Duration + Send + Sync + 'static,
    {
        self.ttl = Box::new(f);
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheError) -> Response<Body> + Send + Sync + 'static,
    {
        self.on_error = Box::new(f);
        self
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<Body> {
        let (parts, incoming) = req.into_parts();
        let body = match incoming.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => return (self.on_error)(&CacheError::Transient(e.to_string())),
        };
        let view = RequestView { method: parts.method, uri: parts.uri, headers: parts.headers, body };

        let cache_key = (self.cache_key)(&view);
        let key = Key::parse(&cache_key);

        match self.backend.open(&key).await {
            Ok((stream, headers)) => self.hit_response(headers, stream),
            Err(e) if e.is_not_found() => self.miss(&view, &key).await,
            Err(e) => (self.on_error)(&e),
        }
    }

    fn hit_response(&self, headers: HeaderMap, stream: crate::object::ByteStream) -> Response<Body> {
        let mut builder = Response::builder().status(StatusCode::OK);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        let body = stream_body(stream.map(|chunk| chunk.map_err(std::io::Error::other)));
        builder.body(body).expect("hit response is always valid")
    }

    /// Upstream fetch (§4.7 step 4): a non-200 upstream status streams
    /// through untouched (P9); a 200 status tees body bytes into both the
    /// client response and a cache writer (P8).
    async fn miss(&self, view: &RequestView, key: &Key) -> Response<Body> {
        let upstream_req = match (self.transform)(view) {
            Ok(r) => r,
            Err(e) => return (self.on_error)(&e),
        };

        let upstream_resp = match self.client.request(upstream_req).await {
            Ok(r) => r,
            Err(e) => return (self.on_error)(&CacheError::Transient(e.to_string())),
        };

        if upstream_resp.status() != StatusCode::OK {
            return pass_through(upstream_resp);
        }

        let ttl = (self.ttl)(view);
        let writer = match self.backend.create(key, upstream_resp.headers().clone(), ttl).await {
            Ok(w) => w,
            Err(e) => return (self.on_error)(&e),
        };

        let status = upstream_resp.status();
        let mut response_headers = Response::builder().status(status);
        for (name, value) in upstream_resp.headers().iter() {
            response_headers = response_headers.header(name, value);
        }

        let (tx, rx) = mpsc::unbounded_channel::<std::result::Result<Bytes, std::io::Error>>();
        tokio::spawn(tee(upstream_resp.into_body(), writer, tx));

        let body = stream_body(receiver_stream(rx));
        response_headers.body(body).expect("tee'd response is always valid")
    }
}

fn pass_through(resp: Response<Incoming>) -> Response<Body> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    let body = resp.into_body();
    builder
        .body(stream_body(
            http_body_util::BodyStream::new(body)
                .filter_map(|frame| async move {
                    frame.ok().and_then(|f| f.into_data().ok())
                })
                .map(Ok),
        ))
        .expect("pass-through response is always valid")
}

/// Reads upstream body frames, forwarding each chunk to the client channel
/// and writing it into the cache; closes the cache writer on success,
/// aborts it on any failure so no partial object commits (§4.7 step 4,
/// I2).
async fn tee(
    body: Incoming,
    mut writer: Box<dyn crate::object::WriteStream>,
    tx: mpsc::UnboundedSender<std::result::Result<Bytes, std::io::Error>>,
) {
    let mut stream = http_body_util::BodyStream::new(body);
    while let Some(frame) = stream.next().await {
        let chunk = match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => data,
                Err(_) => continue,
            },
            Err(e) => {
                let _ = tx.send(Err(std::io::Error::other(e.to_string())));
                writer.abort().await;
                return;
            }
        };
        if let Err(e) = writer.write(chunk.clone()).await {
            let _ = tx.send(Err(std::io::Error::other(e.to_string())));
            writer.abort().await;
            return;
        }
        if tx.send(Ok(chunk)).is_err() {
            // Client gone; still finish writing so the cache entry commits.
            continue;
        }
    }
    if let Err(e) = writer.close().await {
        tracing::warn!(error = %e, "cache commit failed after tee");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::object::open_to_bytes;

    fn view(url: &str) -> RequestView {
        RequestView {
            method: Method::GET,
            uri: url.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn hit_path_never_touches_upstream() {
        let backend = MemoryBackend::new(1024, Duration::from_secs(60));
        let key = Key::parse("https://example.com/a");
        crate::object::create_from_bytes(
            backend.as_ref(),
            &key,
            HeaderMap::new(),
            Duration::ZERO,
            Bytes::from_static(b"cached"),
        )
        .await
        .unwrap();

        let handler = CachingHandler::new(backend.clone());
        // hit_response doesn't go through hyper's server; exercise it via
        // the lower-level path directly since we have no live upstream.
        let (stream, headers) = backend.open(&key).await.unwrap();
        let resp = handler.hit_response(headers, stream);
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn default_cache_key_is_the_url() {
        let v = view("https://example.com/x");
        assert_eq!(default_cache_key(&v), "https://example.com/x");
    }

    #[tokio::test]
    async fn miss_records_nothing_when_backend_already_has_it() {
        // Sanity: open_to_bytes on a populated backend doesn't invoke miss.
        let backend = MemoryBackend::new(1024, Duration::from_secs(60));
        let key = Key::from_bytes("k");
        crate::object::create_from_bytes(
            backend.as_ref(),
            &key,
            HeaderMap::new(),
            Duration::ZERO,
            Bytes::from_static(b"v"),
        )
        .await
        .unwrap();
        let (body, _) = open_to_bytes(backend.as_ref(), &key).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"v"));
    }
}
