//! Integration tests driving [`CachingHandler::handle`] over real loopback
//! connections (§8 scenario 5, P8, P9). Grounded on `rapina/tests/cache.rs`'s
//! pattern of exercising the handler through a live app rather than calling
//! its internals directly; since `relaycache` has no in-process `TestClient`
//! (the handler consumes `hyper::body::Incoming`, which only a real
//! connection produces), both the "upstream" and the caching server here are
//! real loopback `hyper` listeners.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;

use relaycache::backend::memory::MemoryBackend;
use relaycache::error::CacheError;
use relaycache::handler::CachingHandler;
use relaycache::object::Backend;

/// Binds a listener on an ephemeral loopback port and spawns an accept loop
/// calling `make_response` for every request, mirroring `server.rs`'s
/// `App::serve` accept loop in miniature.
async fn spawn_server<F>(make_response: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Response<Full<Bytes>> + Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let io = TokioIo::new(stream);
            let make_response = make_response.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let resp = make_response(req);
                    async move { Ok::<_, Infallible>(resp) }
                });
                let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                let _ = builder.serve_connection(io, svc).await;
            });
        }
    });

    addr
}

/// Spawns a live server backed by `handler` (the caching proxy under test).
async fn spawn_handler_server(handler: Arc<CachingHandler>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let io = TokioIo::new(stream);
            let handler = handler.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle(req).await) }
                });
                let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                let _ = builder.serve_connection(io, svc).await;
            });
        }
    });

    addr
}

async fn get_body(client: &Client<HttpConnector, Full<Bytes>>, uri: &str) -> (StatusCode, Bytes) {
    let resp = client
        .request(Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn cache_miss_then_hit_reaches_upstream_exactly_once() {
    let upstream_hits = Arc::new(AtomicUsize::new(0));
    let hits = upstream_hits.clone();
    let upstream_addr = spawn_server(move |_req| {
        hits.fetch_add(1, Ordering::SeqCst);
        Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from_static(b"upstream body")))
            .unwrap()
    })
    .await;

    let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(60));
    let handler = Arc::new(CachingHandler::new(backend.clone()).transform(move |view| {
        let uri = format!("http://{upstream_addr}{}", view.uri.path());
        Request::builder()
            .method(view.method.clone())
            .uri(uri)
            .body(Full::new(view.body.clone()))
            .map_err(|e| CacheError::internal(e.to_string()))
    }));

    let proxy_addr = spawn_handler_server(handler).await;
    let client: Client<HttpConnector, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let url = format!("http://{proxy_addr}/some/key");

    let (status1, body1) = get_body(&client, &url).await;
    let (status2, body2) = get_body(&client, &url).await;

    assert_eq!(status1, StatusCode::OK);
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(body1, body2);
    assert_eq!(body1, Bytes::from_static(b"upstream body"));
    assert_eq!(upstream_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_200_upstream_response_is_never_cached() {
    let upstream_addr = spawn_server(|_req| {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from_static(b"boom")))
            .unwrap()
    })
    .await;

    let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(60));
    let handler = Arc::new(CachingHandler::new(backend.clone()).transform(move |view| {
        let uri = format!("http://{upstream_addr}{}", view.uri.path());
        Request::builder()
            .method(view.method.clone())
            .uri(uri)
            .body(Full::new(view.body.clone()))
            .map_err(|e| CacheError::internal(e.to_string()))
    }));

    let proxy_addr = spawn_handler_server(handler).await;
    let client: Client<HttpConnector, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let url = format!("http://{proxy_addr}/broken/key");

    let (status, body) = get_body(&client, &url).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, Bytes::from_static(b"boom"));

    // default_cache_key uses the request URI as seen server-side, which for
    // a plain (non-absolute-form) HTTP/1.1 request is just the path.
    let key = relaycache::key::Key::parse("/broken/key");
    match backend.open(&key).await {
        Err(e) => assert!(e.is_not_found()),
        Ok(_) => panic!("non-200 upstream response should never be cached"),
    }
}
