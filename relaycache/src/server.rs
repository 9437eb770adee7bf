//! Top-level server wiring: builds a [`Backend`] and the configured
//! [`Strategy`] instances from a [`ServerConfig`], then binds an HTTP
//! listener and dispatches each connection by mount prefix (§6.2, §6.3).
//! The accept loop is grounded on the `tako` example's `server::run` —
//! one task per connection, `hyper_util`'s `TokioIo` adapter — since the
//! teacher's own retrieved sources stop short of its listener loop.

use std::convert::Infallible;
use std::sync::Arc;

use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::backend::disk::DiskBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::remote::RemoteBackend;
use crate::backend::tiered::maybe_new_tiered;
use crate::config::{BackendConfig, ServerConfig};
use crate::error::{CacheError, Result};
use crate::object::Backend;
use crate::response::{Body, full_body};
use crate::scheduler::{PrefixedScheduler, Scheduler};
use crate::strategy::Strategy;

const MB: u64 = 1024 * 1024;

async fn build_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::Memory { limit_mb, max_ttl } => {
            let ttl = BackendConfig::parse_max_ttl(max_ttl)?;
            Ok(MemoryBackend::new(limit_mb * MB, ttl) as Arc<dyn Backend>)
        }
        BackendConfig::Disk { path, limit_mb, max_ttl } => {
            let ttl = BackendConfig::parse_max_ttl(max_ttl)?;
            Ok(DiskBackend::open(path.clone(), limit_mb * MB, ttl).await? as Arc<dyn Backend>)
        }
        BackendConfig::Remote { url, limit_mb, max_ttl } => {
            let ttl = BackendConfig::parse_max_ttl(max_ttl)?;
            Ok(Arc::new(RemoteBackend::new(url.clone(), limit_mb * MB, ttl)) as Arc<dyn Backend>)
        }
        BackendConfig::Tiered { tiers } => {
            let mut built = Vec::with_capacity(tiers.len());
            for tier in tiers {
                built.push(Box::pin(build_backend(tier)).await?);
            }
            Ok(maybe_new_tiered(built))
        }
    }
}

struct MountedStrategy {
    url_prefix: String,
    strategy: Arc<dyn Strategy>,
}

/// An assembled, ready-to-serve instance: the backend, the mounted
/// strategies in longest-prefix-first order, and the scheduler they share.
pub struct App {
    mounted: Vec<MountedStrategy>,
    scheduler: Arc<Scheduler>,
    bind: String,
}

impl App {
    pub async fn build(config: &ServerConfig) -> Result<Arc<Self>> {
        let backend = build_backend(&config.backend).await?;
        let scheduler = Scheduler::new(config.scheduler.concurrency);

        let mut mounted = Vec::new();
        for block in config.strategies_with_default() {
            let factory = crate::strategy::lookup(&block.name).ok_or_else(|| {
                CacheError::invalid_argument(format!("unknown strategy {:?}", block.name))
            })?;
            let prefixed_scheduler = PrefixedScheduler::new(scheduler.clone(), format!("{}:", block.name));
            let strategy_config = crate::strategy::StrategyConfig::from(block.clone());
            let strategy = (factory.build)(&strategy_config, backend.clone(), prefixed_scheduler);
            mounted.push(MountedStrategy { url_prefix: block.url_prefix, strategy });
        }
        // Longest prefix first so a more specific mount (e.g. `/git/foo/`)
        // wins over a shorter one (e.g. `/git/`).
        mounted.sort_by_key(|m| std::cmp::Reverse(m.url_prefix.len()));

        Ok(Arc::new(Self { mounted, scheduler, bind: config.bind.clone() }))
    }

    fn route<'a>(&'a self, path: &'a str) -> Option<(&'a str, &'a Arc<dyn Strategy>)> {
        self.mounted
            .iter()
            .find(|m| path.starts_with(m.url_prefix.as_str()))
            .map(|m| (&path[m.url_prefix.len()..], &m.strategy))
    }

    async fn dispatch(self: Arc<Self>, req: Request<Incoming>) -> Response<Body> {
        let path = req.uri().path().to_string();
        if path == "/_liveness" || path == "/_readiness" {
            return Response::builder()
                .status(StatusCode::OK)
                .body(full_body(bytes::Bytes::from_static(b"OK")))
                .expect("liveness response is always valid");
        }
        match self.route(&path) {
            Some((rest, strategy)) => strategy.handle(rest.trim_start_matches('/'), req).await,
            None => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(full_body(bytes::Bytes::new()))
                .expect("not-found response is always valid"),
        }
    }

    /// Binds the listener and serves until `shutdown` is cancelled (§5:
    /// "Cancellation of the scheduler's context stops workers").
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.bind).await.map_err(CacheError::from)?;
        tracing::info!(bind = %self.bind, "relaycache listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.scheduler.cancel();
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted.map_err(CacheError::from)?;
                    let io = TokioIo::new(stream);
                    let app = self.clone();
                    let conn_shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let app = app.clone();
                            async move { Ok::<_, Infallible>(app.dispatch(req).await) }
                        });

                        let builder = auto::Builder::new(hyper_util::rt::TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::select! {
                            result = conn => {
                                if let Err(err) = result {
                                    tracing::warn!(error = %err, "connection error");
                                }
                            }
                            _ = conn_shutdown.cancelled() => {}
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, ServerConfig};

    fn test_config(bind: &str) -> ServerConfig {
        ServerConfig {
            bind: bind.to_string(),
            url: format!("http://{bind}"),
            scheduler: SchedulerConfig { concurrency: 1 },
            backend: BackendConfig::Memory { limit_mb: 1, max_ttl: "1h".to_string() },
            strategy: Vec::new(),
        }
    }

    #[tokio::test]
    async fn builds_with_only_the_implicit_default_strategy() {
        let config = test_config("127.0.0.1:0");
        let app = App::build(&config).await.unwrap();
        assert_eq!(app.mounted.len(), 1);
        assert_eq!(app.mounted[0].url_prefix, "/api/v1/");
    }

    #[tokio::test]
    async fn explicit_default_block_is_not_duplicated() {
        let mut config = test_config("127.0.0.1:0");
        config.strategy.push(crate::config::StrategyBlock {
            name: "default".to_string(),
            url_prefix: "/api/v1/".to_string(),
            options: std::collections::HashMap::new(),
        });
        let app = App::build(&config).await.unwrap();
        assert_eq!(app.mounted.len(), 1);
        assert!(app.route("/api/v1/somekey").is_some());
        assert!(app.route("/other").is_none());
    }
}
