//! Streaming tar+zstd snapshot codec (C10): archives a directory tree into
//! a cache object and restores one back to a directory, never touching
//! temp files. Grounded on `rapina`'s own streaming-pipe idiom for backend
//! writers (`tokio::io::duplex`), generalized to carry a `tar`-over-`zstd`
//! pipeline instead of JSON bytes (§4.9).

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{CacheError, Result};
use crate::key::Key;
use crate::object::Backend;

const PIPE_BUF: usize = 64 * 1024;

/// `Create(ctx, cache, key, directory, ttl, excludePatterns)` (§4.9).
pub async fn create(
    backend: &dyn Backend,
    key: &Key,
    directory: &Path,
    ttl: Duration,
    exclude_patterns: &[String],
) -> Result<()> {
    let meta = tokio::fs::metadata(directory)
        .await
        .map_err(|e| CacheError::invalid_argument(format!("{}: {e}", directory.display())))?;
    if !meta.is_dir() {
        return Err(CacheError::invalid_argument(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let filename = directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/zstd".parse().unwrap());
    headers.insert(
        "content-disposition",
        format!("attachment; filename=\"{filename}.tar.zst\"").parse().unwrap(),
    );

    let mut writer = backend.create(key, headers, ttl).await?;

    let (mut pipe_writer, mut pipe_reader) = tokio::io::duplex(PIPE_BUF);
    let directory = directory.to_path_buf();
    let exclude_patterns = exclude_patterns.to_vec();

    let encode_task = tokio::task::spawn_blocking(move || {
        encode_tar_zstd(&directory, &exclude_patterns, SyncWriteAdapter(&mut pipe_writer))
    });

    let mut buf = vec![0u8; PIPE_BUF];
    let read_result: Result<()> = async {
        loop {
            let n = pipe_reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        Ok(())
    }
    .await;

    let encode_result = encode_task
        .await
        .map_err(|e| CacheError::internal(format!("archive task panicked: {e}")))?;

    match (read_result, encode_result) {
        (Ok(()), Ok(())) => {
            writer.close().await?;
            Ok(())
        }
        (Err(e), _) | (_, Err(e)) => {
            writer.abort().await;
            Err(e)
        }
    }
}

/// `Restore(ctx, cache, key, directory)` (§4.9).
pub async fn restore(backend: &dyn Backend, key: &Key, directory: &Path) -> Result<()> {
    let (mut stream, _headers) = backend.open(key).await?;

    tokio::fs::create_dir_all(directory).await?;
    set_dir_permissions(directory, 0o750).await;

    let (mut pipe_writer, pipe_reader) = tokio::io::duplex(PIPE_BUF);
    let directory_clone = directory.to_path_buf();
    let decode_task = tokio::task::spawn_blocking(move || {
        decode_tar_zstd(&directory_clone, SyncReadAdapter(pipe_reader))
    });

    use futures::StreamExt;
    let feed_result: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            pipe_writer.write_all(&chunk).await?;
        }
        Ok(())
    }
    .await;
    drop(pipe_writer);

    let decode_result = decode_task
        .await
        .map_err(|e| CacheError::internal(format!("extractor task panicked: {e}")))?;

    feed_result?;
    decode_result
}

#[cfg(unix)]
async fn set_dir_permissions(directory: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = tokio::fs::metadata(directory).await {
        let mut perms = meta.permissions();
        perms.set_mode(mode);
        let _ = tokio::fs::set_permissions(directory, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_dir_permissions(_directory: &Path, _mode: u32) {}

/// Blocking producer side: walks `directory`, writes a POSIX tar stream
/// honoring `exclude_patterns` (any path component match, tar `--exclude`
/// semantics), zstd-compresses it, and writes the result to `sink`.
fn encode_tar_zstd(directory: &Path, exclude_patterns: &[String], sink: SyncWriteAdapter<'_>) -> Result<()> {
    let encoder = zstd::stream::write::Encoder::new(sink, 0)
        .map_err(|e| CacheError::internal(format!("zstd encoder: {e}")))?
        .auto_finish();
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);

    append_dir_contents(&mut archive, directory, directory, exclude_patterns)?;

    archive
        .into_inner()
        .map_err(|e| CacheError::internal(format!("tar finish: {e}")))?;
    Ok(())
}

fn append_dir_contents<W: std::io::Write>(
    archive: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
    exclude_patterns: &[String],
) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(CacheError::from)?;
    for entry in entries {
        let entry = entry.map_err(CacheError::from)?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path);

        if is_excluded(rel, exclude_patterns) {
            continue;
        }

        let file_type = entry.file_type().map_err(CacheError::from)?;
        if file_type.is_dir() {
            append_dir_contents(archive, root, &path, exclude_patterns)?;
        } else {
            // Covers both regular files and symlinks: `follow_symlinks(false)`
            // makes this store the link itself rather than its target.
            archive
                .append_path_with_name(&path, rel)
                .map_err(|e| CacheError::internal(format!("tar append {}: {e}", path.display())))?;
        }
    }
    Ok(())
}

/// Matches `--exclude` semantics: a pattern matches if it matches any path
/// component, not just the full relative path.
fn is_excluded(rel: &Path, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let rel_str = rel.to_string_lossy();
    patterns.iter().any(|p| {
        glob_match::glob_match(p, &rel_str)
            || rel.components().any(|c| glob_match::glob_match(p, &c.as_os_str().to_string_lossy()))
    })
}

fn decode_tar_zstd(directory: &Path, source: SyncReadAdapter) -> Result<()> {
    let decoder = zstd::stream::read::Decoder::new(source)
        .map_err(|e| CacheError::internal(format!("zstd decoder: {e}")))?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false);
    archive
        .unpack(directory)
        .map_err(|e| CacheError::internal(format!("tar unpack: {e}")))?;
    Ok(())
}

/// Adapts an async `DuplexStream` half to `std::io::Write`/`std::io::Read`
/// so the blocking tar/zstd encoders can drive it from a `spawn_blocking`
/// task, mirroring the handler's request to keep I/O off the async
/// executor while the directory walk and compression run.
struct SyncWriteAdapter<'a>(&'a mut tokio::io::DuplexStream);

impl std::io::Write for SyncWriteAdapter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        futures::executor::block_on(self.0.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        futures::executor::block_on(self.0.flush())
    }
}

struct SyncReadAdapter(tokio::io::DuplexStream);

impl std::io::Read for SyncReadAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        futures::executor::block_on(self.0.read(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[tokio::test]
    async fn round_trips_a_directory_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"world").unwrap();

        let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(60));
        let key = Key::from_bytes("snap");
        create(backend.as_ref(), &key, src.path(), Duration::ZERO, &[]).await.unwrap();

        let (_, headers) = backend.open(&key).await.unwrap();
        assert_eq!(headers.get("content-type").unwrap(), "application/zstd");

        let dst = tempfile::tempdir().unwrap();
        let restore_dir = dst.path().join("restored");
        restore(backend.as_ref(), &key, &restore_dir).await.unwrap();

        assert_eq!(std::fs::read(restore_dir.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(restore_dir.join("sub/b.txt")).unwrap(), b"world");
    }

    #[tokio::test]
    async fn exclude_patterns_drop_matching_entries() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.txt"), b"k").unwrap();
        std::fs::write(src.path().join("skip.log"), b"s").unwrap();

        let backend = MemoryBackend::new(1024 * 1024, Duration::from_secs(60));
        let key = Key::from_bytes("snap-excl");
        create(
            backend.as_ref(),
            &key,
            src.path(),
            Duration::ZERO,
            &["*.log".to_string()],
        )
        .await
        .unwrap();

        let dst = tempfile::tempdir().unwrap();
        restore(backend.as_ref(), &key, dst.path()).await.unwrap();

        assert!(dst.path().join("keep.txt").exists());
        assert!(!dst.path().join("skip.log").exists());
    }

    #[tokio::test]
    async fn create_rejects_a_non_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = MemoryBackend::new(1024, Duration::from_secs(60));
        let key = Key::from_bytes("not-a-dir");
        let err = create(backend.as_ref(), &key, file.path(), Duration::ZERO, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }
}
