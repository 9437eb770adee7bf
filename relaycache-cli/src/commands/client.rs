//! Client subcommands: each wraps the configured server as a
//! [`RemoteBackend`] and calls straight into the object-API helpers and the
//! snapshot codec the core crate already exports — no command-specific
//! networking code lives here (§6.1, §6.3). Errors propagate as
//! [`CacheError`] all the way to `main`, which maps the kind to the exit
//! code §7 specifies.

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use relaycache::backend::remote::RemoteBackend;
use relaycache::duration::parse_ttl;
use relaycache::error::Result;
use relaycache::key::Key;
use relaycache::object::{Backend, create_from_bytes, open_to_bytes};
use relaycache::snapshot;

use crate::colors;

fn backend(server: &str) -> RemoteBackend {
    RemoteBackend::new(server.to_string(), 0, Duration::ZERO)
}

pub async fn get(server: &str, key_text: &str, output: Option<&Path>) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let backend = backend(server);
    let key = Key::parse(key_text);
    let (body, _headers) = open_to_bytes(&backend, &key).await?;
    match output {
        Some(path) => tokio::fs::write(path, &body).await?,
        None => tokio::io::stdout().write_all(&body).await?,
    }
    Ok(())
}

pub async fn stat(server: &str, key_text: &str) -> Result<()> {
    let backend = backend(server);
    let key = Key::parse(key_text);
    let headers = backend.stat(&key).await?;
    for (name, value) in headers.iter() {
        println!(
            "{}: {}",
            name.as_str().custom_color(colors::lavender()),
            value.to_str().unwrap_or("<binary>")
        );
    }
    Ok(())
}

pub async fn put(server: &str, key_text: &str, file: &Path, ttl_text: &str) -> Result<()> {
    let backend = backend(server);
    let key = Key::parse(key_text);
    let ttl = parse_ttl(ttl_text)?;
    let body = tokio::fs::read(file).await?;
    create_from_bytes(&backend, &key, http::HeaderMap::new(), ttl, body.into()).await?;
    println!("{} {}", "stored".custom_color(colors::green()).bold(), key);
    Ok(())
}

pub async fn delete(server: &str, key_text: &str) -> Result<()> {
    let backend = backend(server);
    let key = Key::parse(key_text);
    backend.delete(&key).await?;
    println!("{} {}", "deleted".custom_color(colors::red()).bold(), key);
    Ok(())
}

pub async fn snapshot(
    server: &str,
    key_text: &str,
    directory: &Path,
    ttl_text: &str,
    exclude: &[String],
) -> Result<()> {
    let backend = backend(server);
    let key = Key::parse(key_text);
    let ttl = parse_ttl(ttl_text)?;
    snapshot::create(&backend, &key, directory, ttl, exclude).await?;
    println!(
        "{} {} -> {}",
        "snapshotted".custom_color(colors::green()).bold(),
        directory.display(),
        key
    );
    Ok(())
}

pub async fn restore(server: &str, key_text: &str, directory: &Path) -> Result<()> {
    let backend = backend(server);
    let key = Key::parse(key_text);
    snapshot::restore(&backend, &key, directory).await?;
    println!(
        "{} {} -> {}",
        "restored".custom_color(colors::green()).bold(),
        key,
        directory.display()
    );
    Ok(())
}
