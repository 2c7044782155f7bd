//! Object storage boundary.
//!
//! Sources are read as byte streams so large uploads never sit in memory;
//! derived artifacts are written under deterministic keys, so a redelivered
//! job overwrites its previous output.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Chunked object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open an object for streaming reads.
    async fn get_object(&self, key: &str) -> StorageResult<ByteStream>;

    /// Write an in-memory artifact.
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Write an artifact from a local file without reading it into memory.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Stream `key` into a local file, returning the number of bytes written.
pub async fn download_to_file(store: &dyn ObjectStore, key: &str, path: &Path) -> StorageResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut stream = store.get_object(key).await?;
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(
        key,
        bytes = written,
        backend = store.backend_name(),
        "Staged object to {}",
        path.display()
    );
    Ok(written)
}

/// Read a whole object into memory. Only for small artifacts.
pub async fn read_object(store: &dyn ObjectStore, key: &str) -> StorageResult<Vec<u8>> {
    let mut stream = store.get_object(key).await?;
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// Reject keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == ".." || part == ".") {
        return Err(StorageError::InvalidKey(format!(
            "key contains invalid path segments: {}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("derived/abc/thumbnail_320.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("derived/../secrets").is_err());
        assert!(validate_key("derived/./x").is_err());
    }
}
