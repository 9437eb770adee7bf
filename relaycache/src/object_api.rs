//! HTTP surface for the object API (§6.1): `GET/POST/DELETE /{key}`, served
//! both by the always-on "default" strategy (mounted at `/api/v1/`, §4.8)
//! and by the remote backend's server adapter (§4.5) — the same handler
//! function backs both, since their wire contract is identical.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::duration::parse_ttl;
use crate::error::CacheError;
use crate::key::Key;
use crate::object::{Backend, create_from_bytes, open_to_bytes};
use crate::response::{Body, error_response, full_body};

const TIME_TO_LIVE_HEADER: &str = "time-to-live";
const HOP_BY_HOP: &[&str] = &["host", "content-length", "time-to-live", "connection"];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn requested_ttl(headers: &HeaderMap) -> Result<Duration, CacheError> {
    match headers.get(TIME_TO_LIVE_HEADER) {
        None => Ok(Duration::ZERO),
        Some(value) => {
            let text = value
                .to_str()
                .map_err(|_| CacheError::invalid_argument("Time-To-Live header is not UTF-8"))?;
            parse_ttl(text)
        }
    }
}

/// Handles one object-API request against `backend`. `key_text` is the
/// `{key}` path segment, already stripped of its mount prefix.
pub async fn handle(
    backend: &dyn Backend,
    key_text: &str,
    req: Request<Incoming>,
) -> Response<Body> {
    let key = Key::parse(key_text);
    match *req.method() {
        Method::GET => get(backend, &key).await,
        Method::POST => post(backend, &key, req).await,
        Method::DELETE => delete(backend, &key).await,
        _ => Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(full_body(Bytes::new()))
            .expect("status-only response is always valid"),
    }
}

async fn get(backend: &dyn Backend, key: &Key) -> Response<Body> {
    match open_to_bytes(backend, key).await {
        Ok((body, headers)) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            for (name, value) in headers.iter() {
                builder = builder.header(name, value);
            }
            builder
                .body(full_body(body))
                .expect("object response is always valid")
        }
        Err(e) => error_response(&e),
    }
}

async fn post(backend: &dyn Backend, key: &Key, req: Request<Incoming>) -> Response<Body> {
    let ttl = match requested_ttl(req.headers()) {
        Ok(ttl) => ttl,
        Err(e) => return error_response(&e),
    };
    let headers = strip_hop_by_hop(req.headers());

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(&CacheError::Transient(e.to_string())),
    };

    match create_from_bytes(backend, key, headers, ttl, body).await {
        Ok(()) => StatusCodeResponse::ok(),
        Err(e) => error_response(&e),
    }
}

async fn delete(backend: &dyn Backend, key: &Key) -> Response<Body> {
    match backend.delete(key).await {
        Ok(()) => StatusCodeResponse::ok(),
        Err(e) => error_response(&e),
    }
}

struct StatusCodeResponse;
impl StatusCodeResponse {
    fn ok() -> Response<Body> {
        Response::builder()
            .status(StatusCode::OK)
            .body(full_body(Bytes::new()))
            .expect("status-only response is always valid")
    }
}

/// A process-wide default strategy implementing the put/get/delete object
/// API, always mounted at `/api/v1/` (§4.8). Wraps whichever backend the
/// server was configured with.
pub struct DefaultStrategy {
    pub backend: Arc<dyn Backend>,
}

impl DefaultStrategy {
    pub async fn handle(&self, key_text: &str, req: Request<Incoming>) -> Response<Body> {
        handle(self.backend.as_ref(), key_text, req).await
    }
}
