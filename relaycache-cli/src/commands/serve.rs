//! Boots the HTTP server from a TOML configuration file. Config parsing
//! lives here, not in the core crate (§10.3 — "core never parses config
//! files"; the binary builds the typed [`ServerConfig`] the core consumes).

use std::path::Path;

use relaycache::config::ServerConfig;
use relaycache::error::{CacheError, Result};
use relaycache::server::App;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub async fn execute(config_path: &Path) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let text = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| CacheError::invalid_argument(format!("{}: {e}", config_path.display())))?;
    let config: ServerConfig = toml::from_str(&text)
        .map_err(|e| CacheError::invalid_argument(format!("bad config: {e}")))?;

    let app = App::build(&config).await?;

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    ctrlc::set_handler(move || ctrlc_token.cancel())
        .map_err(|e| CacheError::internal(e.to_string()))?;

    app.serve(shutdown).await
}
