//! Source file models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Read-only view of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceFile {
    pub file_id: FileId,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl SourceFile {
    pub fn new(
        file_id: impl Into<FileId>,
        storage_key: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            storage_key: storage_key.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    pub fn category(&self) -> MimeCategory {
        MimeCategory::from_mime(&self.mime_type)
    }
}

/// Coarse media category used to pick the derived-asset jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MimeCategory {
    Video,
    Audio,
    Image,
    Other,
}

impl MimeCategory {
    /// Classify a MIME type by its top-level type.
    pub fn from_mime(mime: &str) -> Self {
        let top = mime
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match top.as_str() {
            "video" => MimeCategory::Video,
            "audio" => MimeCategory::Audio,
            "image" => MimeCategory::Image,
            _ => MimeCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeCategory::Video => "video",
            MimeCategory::Audio => "audio",
            MimeCategory::Image => "image",
            MimeCategory::Other => "other",
        }
    }
}

/// Aggregate processing status of a file. Mutated only by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Uploading,
    Processing,
    Ready,
    ProcessingFailed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Processing => "processing",
            FileStatus::Ready => "ready",
            FileStatus::ProcessingFailed => "processing_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Ready | FileStatus::ProcessingFailed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(FileStatus::Uploading),
            "processing" => Ok(FileStatus::Processing),
            "ready" => Ok(FileStatus::Ready),
            "processing_failed" => Ok(FileStatus::ProcessingFailed),
            other => Err(format!("unknown file status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_category() {
        assert_eq!(MimeCategory::from_mime("video/mp4"), MimeCategory::Video);
        assert_eq!(MimeCategory::from_mime("Audio/WAV"), MimeCategory::Audio);
        assert_eq!(MimeCategory::from_mime("image/png"), MimeCategory::Image);
        assert_eq!(MimeCategory::from_mime("application/pdf"), MimeCategory::Other);
        assert_eq!(MimeCategory::from_mime(""), MimeCategory::Other);
    }

    #[test]
    fn test_file_status_roundtrip() {
        let status: FileStatus = "processing_failed".parse().unwrap();
        assert_eq!(status, FileStatus::ProcessingFailed);
        assert!(status.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
    }
}
