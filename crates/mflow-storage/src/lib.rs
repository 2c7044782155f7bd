//! Storage boundaries of the media pipeline.
//!
//! This crate provides:
//! - `ObjectStore` for source bytes and derived artifacts (S3/R2, local
//!   filesystem, in-memory)
//! - `FileRecordStore` for file records: technical metadata, derived assets
//!   and status (Redis hashes, in-memory)

pub mod error;
pub mod local;
pub mod memory;
pub mod object;
pub mod records;
pub mod redis_records;
pub mod s3;

pub use error::{StorageError, StorageResult};
pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;
pub use object::{download_to_file, read_object, ByteStream, ObjectStore};
pub use records::{FileRecord, FileRecordStore, InMemoryFileRecords};
pub use redis_records::RedisFileRecords;
pub use s3::{S3Config, S3Store};
