//! HTTP client backend (C6): dispatches Open/Stat/Create/Delete to another
//! relaycache process's object API (§4.5, §6.1) instead of storing objects
//! locally. Built on `hyper-util`'s client-legacy, the same client stack
//! `rapina`'s own HTTP calls use.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::duration::format_ttl;
use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::{BoxFuture, ByteStream, Backend, WriteStream, single_chunk_stream};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Talks to a remote relaycache object API over HTTP (§4.5).
pub struct RemoteBackend {
    client: HttpClient,
    base_url: String,
    limit_bytes: u64,
    max_ttl: Duration,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, limit_bytes: u64, max_ttl: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url, limit_bytes, max_ttl }
    }

    fn object_uri(&self, key: &Key) -> Result<Uri> {
        format!("{}/{}", self.base_url, key.to_hex())
            .parse()
            .map_err(|e| CacheError::internal(format!("bad remote base url: {e}")))
    }

    async fn classify_status(status: StatusCode, key: &Key) -> CacheError {
        match status {
            StatusCode::NOT_FOUND => CacheError::not_found(key.to_string()),
            s if s.is_client_error() => {
                CacheError::invalid_argument(format!("remote rejected request: {s}"))
            }
            s => CacheError::Transient(format!("remote returned {s}")),
        }
    }
}

impl Backend for RemoteBackend {
    fn open(&self, key: &Key) -> BoxFuture<'_, Result<(ByteStream, HeaderMap)>> {
        let key = *key;
        Box::pin(async move {
            let uri = self.object_uri(&key)?;
            let req = Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Full::new(Bytes::new()))
                .map_err(|e| CacheError::internal(e.to_string()))?;
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| CacheError::Transient(e.to_string()))?;
            if resp.status() != StatusCode::OK {
                let status = resp.status();
                return Err(Self::classify_status(status, &key).await);
            }
            let headers = resp.headers().clone();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| CacheError::Transient(e.to_string()))?
                .to_bytes();
            Ok((single_chunk_stream(body), headers))
        })
    }

    fn stat(&self, key: &Key) -> BoxFuture<'_, Result<HeaderMap>> {
        let key = *key;
        Box::pin(async move {
            let uri = self.object_uri(&key)?;
            let req = Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Full::new(Bytes::new()))
                .map_err(|e| CacheError::internal(e.to_string()))?;
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| CacheError::Transient(e.to_string()))?;
            if resp.status() != StatusCode::OK {
                let status = resp.status();
                return Err(Self::classify_status(status, &key).await);
            }
            Ok(resp.headers().clone())
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
            Ok(Box::new(RemoteWriteStream {
                client: self.client.clone(),
                uri: self.object_uri(&key)?,
                key,
                headers,
                ttl: effective_ttl,
                buf: Vec::new(),
            }) as Box<dyn WriteStream>)
        })
    }

    fn delete(&self, key: &Key) -> BoxFuture<'_, Result<()>> {
        let key = *key;
        Box::pin(async move {
            let uri = self.object_uri(&key)?;
            let req = Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Full::new(Bytes::new()))
                .map_err(|e| CacheError::internal(e.to_string()))?;
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| CacheError::Transient(e.to_string()))?;
            if resp.status() != StatusCode::OK {
                let status = resp.status();
                return Err(Self::classify_status(status, &key).await);
            }
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

struct RemoteWriteStream {
    client: HttpClient,
    uri: Uri,
    key: Key,
    headers: HeaderMap,
    ttl: Duration,
    buf: Vec<Bytes>,
}

impl WriteStream for RemoteWriteStream {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        self.buf.push(chunk);
        Box::pin(async { Ok(()) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let body: Bytes = self.buf.concat().into();
            let mut builder = Request::builder().method(Method::POST).uri(self.uri);
            for (name, value) in self.headers.iter() {
                builder = builder.header(name, value);
            }
            if !self.ttl.is_zero() {
                builder = builder.header("time-to-live", format_ttl(self.ttl));
            }
            let req = builder
                .body(Full::new(body))
                .map_err(|e| CacheError::internal(e.to_string()))?;
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| CacheError::Transient(e.to_string()))?;
            if resp.status() != StatusCode::OK {
                return Err(RemoteBackend::classify_status(resp.status(), &self.key).await);
            }
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {})
    }
}
