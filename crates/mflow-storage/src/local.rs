//! Local filesystem object store.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::object::{validate_key, ByteStream, ObjectStore};

const READ_CHUNK: usize = 256 * 1024;

/// Objects stored as files under a base directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::config_error(format!(
                "failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write through a temp sibling and rename, so readers never observe a
    /// partially written object.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_object(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(key))
            }
            Err(e) => {
                return Err(StorageError::download_failed(format!(
                    "failed to open {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; READ_CHUNK];
            match file.read(&mut buf).await {
                Ok(0) => Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(Some((Bytes::from(buf), file)))
                }
                Err(e) => Err(StorageError::download_failed(format!(
                    "failed to read chunk: {}",
                    e
                ))),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn put_object(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        Self::ensure_parent(&path).await?;
        Self::write_atomic(&path, &data).await?;
        debug!("Stored {} bytes at {}", data.len(), path.display());
        Ok(())
    }

    async fn put_file(&self, key: &str, source: &Path, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        Self::ensure_parent(&path).await?;
        let tmp = path.with_extension("partial");
        tokio::fs::copy(source, &tmp).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} at {}", source.display(), path.display());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{download_to_file, read_object};

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects")).await.unwrap();

        store
            .put_object("derived/f1/waveform_json.json", Bytes::from_static(b"{\"v\":1}"), "application/json")
            .await
            .unwrap();
        store
            .put_object("derived/f1/waveform_json.json", Bytes::from_static(b"{\"v\":2}"), "application/json")
            .await
            .unwrap();

        let data = read_object(&store, "derived/f1/waveform_json.json").await.unwrap();
        assert_eq!(data, b"{\"v\":2}");
        assert!(store.exists("derived/f1/waveform_json.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_large_object_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects")).await.unwrap();
        let payload: Vec<u8> = (0..(READ_CHUNK * 2 + 17)).map(|i| (i % 251) as u8).collect();
        store
            .put_object("uploads/big.bin", Bytes::from(payload.clone()), "application/octet-stream")
            .await
            .unwrap();

        let staged = dir.path().join("stage/big.bin");
        let written = download_to_file(&store, "uploads/big.bin", &staged).await.unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(tokio::fs::read(&staged).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        let missing = store.get_object("nope").await.err().unwrap();
        assert!(missing.is_not_found());

        let invalid = store.get_object("../outside").await.err().unwrap();
        assert!(matches!(invalid, StorageError::InvalidKey(_)));

        store.delete_object("nope").await.unwrap();
    }
}
