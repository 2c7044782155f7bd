//! File record store boundary.
//!
//! The record holds what the pipeline reads (source key, MIME type, size) and
//! what it writes (technical metadata, derived assets, status). Derived
//! assets are keyed by kind, so writing the same kind twice replaces the
//! earlier row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use mflow_models::{AssetKind, DerivedAsset, FileId, FileStatus, SourceFile, TechnicalMetadata};

use crate::error::{StorageError, StorageResult};

/// Everything stored for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file: SourceFile,
    pub status: FileStatus,
    pub metadata: Option<TechnicalMetadata>,
    pub assets: BTreeMap<AssetKind, DerivedAsset>,
    /// Diagnostic for `processing_failed`
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(file: SourceFile) -> Self {
        Self {
            file,
            status: FileStatus::Uploading,
            metadata: None,
            assets: BTreeMap::new(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Create or replace the record for a (re-)uploaded file, discarding
    /// metadata and assets derived from a previous upload.
    async fn register_file(&self, file: &SourceFile) -> StorageResult<()>;

    async fn get_file(&self, file_id: &FileId) -> StorageResult<SourceFile>;

    async fn get_record(&self, file_id: &FileId) -> StorageResult<FileRecord>;

    async fn update_technical_metadata(
        &self,
        file_id: &FileId,
        metadata: &TechnicalMetadata,
    ) -> StorageResult<()>;

    async fn get_metadata(&self, file_id: &FileId) -> StorageResult<Option<TechnicalMetadata>>;

    /// Upsert keyed by (file, kind).
    async fn add_derived_asset(&self, asset: &DerivedAsset) -> StorageResult<()>;

    async fn derived_assets(&self, file_id: &FileId) -> StorageResult<Vec<DerivedAsset>>;

    async fn set_status(
        &self,
        file_id: &FileId,
        status: FileStatus,
        error: Option<&str>,
    ) -> StorageResult<()>;
}

/// Record store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileRecords {
    records: Arc<RwLock<HashMap<FileId, FileRecord>>>,
}

impl InMemoryFileRecords {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, file_id: &FileId, f: impl FnOnce(&FileRecord) -> T) -> StorageResult<T> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::CorruptRecord("record map poisoned".to_string()))?;
        records
            .get(file_id)
            .map(f)
            .ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))
    }

    fn update(&self, file_id: &FileId, f: impl FnOnce(&mut FileRecord)) -> StorageResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::CorruptRecord("record map poisoned".to_string()))?;
        let record = records
            .get_mut(file_id)
            .ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))?;
        f(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl FileRecordStore for InMemoryFileRecords {
    async fn register_file(&self, file: &SourceFile) -> StorageResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::CorruptRecord("record map poisoned".to_string()))?;
        records.insert(file.file_id.clone(), FileRecord::new(file.clone()));
        Ok(())
    }

    async fn get_file(&self, file_id: &FileId) -> StorageResult<SourceFile> {
        self.read(file_id, |r| r.file.clone())
    }

    async fn get_record(&self, file_id: &FileId) -> StorageResult<FileRecord> {
        self.read(file_id, FileRecord::clone)
    }

    async fn update_technical_metadata(
        &self,
        file_id: &FileId,
        metadata: &TechnicalMetadata,
    ) -> StorageResult<()> {
        self.update(file_id, |r| r.metadata = Some(metadata.clone()))
    }

    async fn get_metadata(&self, file_id: &FileId) -> StorageResult<Option<TechnicalMetadata>> {
        self.read(file_id, |r| r.metadata.clone())
    }

    async fn add_derived_asset(&self, asset: &DerivedAsset) -> StorageResult<()> {
        self.update(&asset.file_id, |r| {
            r.assets.insert(asset.kind, asset.clone());
        })
    }

    async fn derived_assets(&self, file_id: &FileId) -> StorageResult<Vec<DerivedAsset>> {
        self.read(file_id, |r| r.assets.values().cloned().collect())
    }

    async fn set_status(
        &self,
        file_id: &FileId,
        status: FileStatus,
        error: Option<&str>,
    ) -> StorageResult<()> {
        self.update(file_id, |r| {
            r.status = status;
            r.last_error = error.map(str::to_string);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> SourceFile {
        SourceFile::new("f1", "uploads/f1.mov", "video/quicktime", 1_000)
    }

    #[tokio::test]
    async fn test_asset_upsert_never_duplicates() {
        let store = InMemoryFileRecords::new();
        store.register_file(&video()).await.unwrap();
        let id = FileId::from("f1");

        for _ in 0..3 {
            let asset = DerivedAsset::new(id.clone(), AssetKind::Thumbnail320, AssetKind::Thumbnail320.storage_key(&id));
            store.add_derived_asset(&asset).await.unwrap();
        }

        let assets = store.derived_assets(&id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].kind, AssetKind::Thumbnail320);
    }

    #[tokio::test]
    async fn test_status_and_metadata() {
        let store = InMemoryFileRecords::new();
        store.register_file(&video()).await.unwrap();
        let id = FileId::from("f1");

        assert_eq!(store.get_metadata(&id).await.unwrap(), None);
        let meta = TechnicalMetadata {
            duration: 12.0,
            ..Default::default()
        };
        store.update_technical_metadata(&id, &meta).await.unwrap();
        assert_eq!(store.get_metadata(&id).await.unwrap(), Some(meta));

        store
            .set_status(&id, FileStatus::ProcessingFailed, Some("probe failed"))
            .await
            .unwrap();
        let record = store.get_record(&id).await.unwrap();
        assert_eq!(record.status, FileStatus::ProcessingFailed);
        assert_eq!(record.last_error.as_deref(), Some("probe failed"));
    }

    #[tokio::test]
    async fn test_reregister_resets_derived_state() {
        let store = InMemoryFileRecords::new();
        store.register_file(&video()).await.unwrap();
        let id = FileId::from("f1");
        store
            .add_derived_asset(&DerivedAsset::new(id.clone(), AssetKind::Proxy360p, "k"))
            .await
            .unwrap();

        store.register_file(&video()).await.unwrap();
        assert!(store.derived_assets(&id).await.unwrap().is_empty());
        assert_eq!(store.get_record(&id).await.unwrap().status, FileStatus::Uploading);
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let store = InMemoryFileRecords::new();
        let err = store.get_file(&FileId::from("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
