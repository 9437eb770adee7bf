//! Minimal HTTP response plumbing shared by the object API server, the
//! caching handler, and the strategy framework. Mirrors the shape
//! `rapina::router`/`rapina::extract` expect from `crate::response`
//! (`BoxBody` + `IntoResponse`), rebuilt here since the framework around
//! them isn't part of this spec's scope.

use bytes::Bytes;
use futures::Stream;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody};
use hyper::body::Frame;

pub type Body = BoxBody<Bytes, std::io::Error>;

pub fn full_body(bytes: Bytes) -> Body {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> Body {
    full_body(Bytes::new())
}

/// Wraps a chunk stream as a response body, for the caching handler's
/// hit path and tee'd miss path (§4.7): the client never waits for the
/// whole body to buffer.
pub fn stream_body(
    stream: impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static,
) -> Body {
    use futures::StreamExt;
    BodyExt::boxed(StreamBody::new(stream.map(|item| item.map(Frame::data))))
}

pub trait IntoResponse {
    fn into_response(self) -> Response<Body>;
}

impl IntoResponse for Response<Body> {
    fn into_response(self) -> Response<Body> {
        self
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response<Body> {
        Response::builder()
            .status(self)
            .body(empty_body())
            .expect("status-only response is always valid")
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response<Body> {
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .body(full_body(Bytes::from_static(self.as_bytes())))
            .expect("text response is always valid")
    }
}

/// A plain-text error body with the status from the error kind (§7: "The
/// HTTP surface returns plain-text error bodies with status codes").
pub fn error_response(err: &crate::error::CacheError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(full_body(Bytes::from(err.to_string())))
        .expect("error response is always valid")
}
