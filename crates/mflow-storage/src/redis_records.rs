//! File record store on Redis hashes.
//!
//! `{prefix}:file:{id}` holds the source, status, metadata and last error;
//! `{prefix}:file:{id}:assets` maps asset kind to the derived asset, so an
//! `HSET` of an existing kind is the upsert.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use mflow_models::{AssetKind, DerivedAsset, FileId, FileStatus, SourceFile, TechnicalMetadata};

use crate::error::{StorageError, StorageResult};
use crate::records::{FileRecord, FileRecordStore};

const FIELD_SOURCE: &str = "source";
const FIELD_STATUS: &str = "status";
const FIELD_METADATA: &str = "metadata";
const FIELD_ERROR: &str = "error";
const FIELD_UPDATED_AT: &str = "updated_at";

#[derive(Clone)]
pub struct RedisFileRecords {
    client: redis::Client,
    prefix: String,
}

impl RedisFileRecords {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> StorageResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    /// Create from `REDIS_URL` and `RECORDS_KEY_PREFIX`.
    pub fn from_env() -> StorageResult<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = std::env::var("RECORDS_KEY_PREFIX").unwrap_or_else(|_| "mflow".to_string());
        Self::new(&url, prefix)
    }

    fn file_key(&self, file_id: &FileId) -> String {
        format!("{}:file:{}", self.prefix, file_id)
    }

    fn assets_key(&self, file_id: &FileId) -> String {
        format!("{}:file:{}:assets", self.prefix, file_id)
    }

    async fn conn(&self) -> StorageResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn ensure_exists(&self, conn: &mut MultiplexedConnection, file_id: &FileId) -> StorageResult<()> {
        let exists: bool = conn.exists(self.file_key(file_id)).await?;
        if exists {
            Ok(())
        } else {
            Err(StorageError::FileNotFound(file_id.to_string()))
        }
    }

    async fn set_fields(&self, file_id: &FileId, fields: &[(&str, String)]) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        self.ensure_exists(&mut conn, file_id).await?;

        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.file_key(file_id));
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        cmd.arg(FIELD_UPDATED_AT).arg(Utc::now().to_rfc3339());
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::CorruptRecord(format!("{}: {}", field, e)))
}

#[async_trait]
impl FileRecordStore for RedisFileRecords {
    async fn register_file(&self, file: &SourceFile) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        let file_key = self.file_key(&file.file_id);

        redis::pipe()
            .atomic()
            .del(&file_key)
            .ignore()
            .del(self.assets_key(&file.file_id))
            .ignore()
            .hset_multiple(
                &file_key,
                &[
                    (FIELD_SOURCE, serde_json::to_string(file)?),
                    (FIELD_STATUS, FileStatus::Uploading.as_str().to_string()),
                    (FIELD_UPDATED_AT, Utc::now().to_rfc3339()),
                ],
            )
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(file_id = %file.file_id, "Registered file record");
        Ok(())
    }

    async fn get_file(&self, file_id: &FileId) -> StorageResult<SourceFile> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.hget(self.file_key(file_id), FIELD_SOURCE).await?;
        let raw = raw.ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))?;
        decode(FIELD_SOURCE, &raw)
    }

    async fn get_record(&self, file_id: &FileId) -> StorageResult<FileRecord> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.file_key(file_id)).await?;
        let source = fields
            .get(FIELD_SOURCE)
            .ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))?;

        let status = fields
            .get(FIELD_STATUS)
            .map(|s| s.parse::<FileStatus>())
            .transpose()
            .map_err(StorageError::CorruptRecord)?
            .unwrap_or_default();

        let metadata = fields
            .get(FIELD_METADATA)
            .map(|m| decode(FIELD_METADATA, m))
            .transpose()?;

        let updated_at = fields
            .get(FIELD_UPDATED_AT)
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let assets: BTreeMap<AssetKind, DerivedAsset> = self
            .derived_assets(file_id)
            .await?
            .into_iter()
            .map(|a| (a.kind, a))
            .collect();

        Ok(FileRecord {
            file: decode(FIELD_SOURCE, source)?,
            status,
            metadata,
            assets,
            last_error: fields.get(FIELD_ERROR).filter(|e| !e.is_empty()).cloned(),
            updated_at,
        })
    }

    async fn update_technical_metadata(
        &self,
        file_id: &FileId,
        metadata: &TechnicalMetadata,
    ) -> StorageResult<()> {
        self.set_fields(file_id, &[(FIELD_METADATA, serde_json::to_string(metadata)?)])
            .await
    }

    async fn get_metadata(&self, file_id: &FileId) -> StorageResult<Option<TechnicalMetadata>> {
        let mut conn = self.conn().await?;
        self.ensure_exists(&mut conn, file_id).await?;
        let raw: Option<String> = conn.hget(self.file_key(file_id), FIELD_METADATA).await?;
        raw.map(|m| decode(FIELD_METADATA, &m)).transpose()
    }

    async fn add_derived_asset(&self, asset: &DerivedAsset) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        self.ensure_exists(&mut conn, &asset.file_id).await?;
        conn.hset::<_, _, _, ()>(
            self.assets_key(&asset.file_id),
            asset.kind.as_str(),
            serde_json::to_string(asset)?,
        )
        .await?;
        Ok(())
    }

    async fn derived_assets(&self, file_id: &FileId) -> StorageResult<Vec<DerivedAsset>> {
        let mut conn = self.conn().await?;
        let rows: HashMap<String, String> = conn.hgetall(self.assets_key(file_id)).await?;
        let mut assets = rows
            .values()
            .map(|raw| decode::<DerivedAsset>("asset", raw))
            .collect::<StorageResult<Vec<_>>>()?;
        assets.sort_by_key(|a| a.kind);
        Ok(assets)
    }

    async fn set_status(
        &self,
        file_id: &FileId,
        status: FileStatus,
        error: Option<&str>,
    ) -> StorageResult<()> {
        self.set_fields(
            file_id,
            &[
                (FIELD_STATUS, status.as_str().to_string()),
                (FIELD_ERROR, error.unwrap_or_default().to_string()),
            ],
        )
        .await
    }
}
