//! Caching HTTP reverse proxy and artifact store core.
//!
//! Four pieces compose the crate: a content-addressed object store with
//! memory/disk/tiered/remote backends (C1-C6), a read-through caching HTTP
//! handler (C8), a job scheduler for rate-limited background work (C7),
//! and a streaming tar+zstd snapshot codec (C10). The strategy framework
//! (C9) ties a backend and a handler to a URL prefix and a name.

pub mod backend;
pub mod config;
pub mod duration;
pub mod error;
pub mod handler;
pub mod key;
pub mod object;
pub mod object_api;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod snapshot;
pub mod strategy;

pub mod prelude {
    pub use crate::backend::disk::DiskBackend;
    pub use crate::backend::memory::MemoryBackend;
    pub use crate::backend::remote::RemoteBackend;
    pub use crate::backend::tiered::{TieredBackend, maybe_new_tiered};
    pub use crate::config::ServerConfig;
    pub use crate::error::{CacheError, Result};
    pub use crate::handler::CachingHandler;
    pub use crate::key::Key;
    pub use crate::object::{Backend, WriteStream};
    pub use crate::server::App;
}
