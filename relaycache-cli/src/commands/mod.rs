//! CLI command implementations: `client` wraps the object API subcommands
//! (get/stat/put/delete/snapshot/restore) as thin calls against a
//! [`relaycache::backend::remote::RemoteBackend`]; `serve` parses a TOML
//! config and boots the HTTP server (§6.3).

pub mod client;
pub mod serve;
