//! Strategy framework (C9): a process-wide registry mapping a strategy
//! *name* to a factory that builds an HTTP handler from a config block and
//! a backend. Grounded on `rapina`'s own route-registration idiom — an
//! `inventory`-collected list populated by a proc-macro at compile time —
//! generalized from "register one HTTP route" to "register one mountable
//! strategy" (§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use http::Request;
use hyper::body::Incoming;

use crate::backend::remote::RemoteBackend;
use crate::object::Backend;
use crate::object_api::DefaultStrategy as ObjectApiStrategy;
use crate::object_api;
use crate::response::Body;
use crate::scheduler::PrefixedScheduler;

/// The per-strategy configuration block, already parsed out of the
/// server's config file by the caller (the CLI owns TOML parsing; core
/// never does — §10.3).
#[derive(Clone, Debug, Default)]
pub struct StrategyConfig {
    pub url_prefix: String,
    pub options: HashMap<String, String>,
}

impl StrategyConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A mounted strategy instance: an HTTP handler dispatched with its mount
/// prefix already stripped from the path (§4.8).
pub trait Strategy: Send + Sync {
    fn handle<'a>(
        &'a self,
        key_or_path: &'a str,
        req: Request<Incoming>,
    ) -> crate::object::BoxFuture<'a, http::Response<Body>>;
}

pub type StrategyBuilder =
    fn(&StrategyConfig, Arc<dyn Backend>, PrefixedScheduler) -> Arc<dyn Strategy>;

/// One registered strategy name, populated by `#[relaycache_macros::strategy("name")]`.
pub struct StrategyFactory {
    pub name: &'static str,
    pub build: StrategyBuilder,
}

inventory::collect!(StrategyFactory);

/// Looks up a registered factory by name (§4.8: "the configuration loader
/// instantiates each configured strategy").
pub fn lookup(name: &str) -> Option<&'static StrategyFactory> {
    inventory::iter::<StrategyFactory>().find(|f| f.name == name)
}

pub fn names() -> Vec<&'static str> {
    inventory::iter::<StrategyFactory>().map(|f| f.name).collect()
}

impl Strategy for ObjectApiStrategy {
    fn handle<'a>(
        &'a self,
        key_or_path: &'a str,
        req: Request<Incoming>,
    ) -> crate::object::BoxFuture<'a, http::Response<Body>> {
        Box::pin(object_api::handle(self.backend.as_ref(), key_or_path, req))
    }
}

#[relaycache_macros::strategy("default")]
fn build_default(
    _config: &StrategyConfig,
    backend: Arc<dyn Backend>,
    _scheduler: PrefixedScheduler,
) -> Arc<dyn Strategy> {
    Arc::new(ObjectApiStrategy { backend })
}

/// Remote-proxy strategy: a bare read/write passthrough to another
/// relaycache server's object API, configured with `upstream_url`. Mostly
/// useful as a worked example of a second strategy composing C6 (§4.8).
struct RemoteProxyStrategy {
    remote: RemoteBackend,
}

impl Strategy for RemoteProxyStrategy {
    fn handle<'a>(
        &'a self,
        key_or_path: &'a str,
        req: Request<Incoming>,
    ) -> crate::object::BoxFuture<'a, http::Response<Body>> {
        Box::pin(object_api::handle(&self.remote, key_or_path, req))
    }
}

#[relaycache_macros::strategy("remote-proxy")]
fn build_remote_proxy(
    config: &StrategyConfig,
    _backend: Arc<dyn Backend>,
    _scheduler: PrefixedScheduler,
) -> Arc<dyn Strategy> {
    let upstream = config.get("upstream_url").unwrap_or_default().to_string();
    Arc::new(RemoteProxyStrategy {
        remote: RemoteBackend::new(upstream, 0, std::time::Duration::ZERO),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_is_registered() {
        assert!(lookup("default").is_some());
    }

    #[test]
    fn registry_lists_every_compiled_in_strategy() {
        let names = names();
        assert!(names.contains(&"default"));
        assert!(names.contains(&"remote-proxy"));
    }
}
