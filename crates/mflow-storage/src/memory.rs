//! In-memory object store for tests and single-process runs.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::object::{validate_key, ByteStream, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    fn write(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::upload_failed("object map poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let data = self
            .objects
            .read()
            .map_err(|_| StorageError::download_failed("object map poisoned"))?
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(data)])))
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.write(key, data, content_type)
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let data = tokio::fs::read(path).await?;
        self.write(key, Bytes::from(data), content_type)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| StorageError::delete_failed("object map poisoned"))?
            .remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self
            .objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::read_object;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let store = InMemoryObjectStore::new();
        store
            .put_object("derived/a/thumbnail_320.jpg", Bytes::from_static(&[0xFF, 0xD8]), "image/jpeg")
            .await
            .unwrap();

        assert_eq!(read_object(&store, "derived/a/thumbnail_320.jpg").await.unwrap(), vec![0xFF, 0xD8]);
        assert_eq!(store.content_type("derived/a/thumbnail_320.jpg").as_deref(), Some("image/jpeg"));

        store.delete_object("derived/a/thumbnail_320.jpg").await.unwrap();
        assert!(store.keys().is_empty());
        assert!(store.get_object("derived/a/thumbnail_320.jpg").await.err().unwrap().is_not_found());
    }
}
