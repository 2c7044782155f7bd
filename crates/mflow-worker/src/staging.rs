//! Per-attempt scratch directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use mflow_models::{Job, SourceFile};

/// Scratch directory of one job attempt, removed on drop so cancelled and
/// failed attempts leave nothing behind.
#[derive(Debug)]
pub struct JobStaging {
    dir: TempDir,
}

impl JobStaging {
    pub async fn create(work_dir: &Path, job: &Job) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(work_dir).await?;
        let prefix = format!("{}-{}-", job.job_type, sanitize(job.file_id.as_str()));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(work_dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local path the source is downloaded to. The extension of the storage
    /// key is kept so decoders can sniff the container.
    pub fn source_path(&self, file: &SourceFile) -> PathBuf {
        let ext = Path::new(&file.storage_key)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));

        match ext {
            Some(ext) => self.path().join(format!("source.{}", ext.to_ascii_lowercase())),
            None => self.path().join("source"),
        }
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .take(48)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_models::{FileId, JobPayload, JobType};

    #[tokio::test]
    async fn test_staging_is_removed_on_drop() {
        let work = tempfile::tempdir().unwrap();
        let job = Job::new(
            FileId::from("a/b"),
            JobType::Proxy,
            JobPayload::new("uploads/clip.MOV", "video/quicktime"),
            3,
        );
        let file = SourceFile::new("a/b", "uploads/clip.MOV", "video/quicktime", 10);

        let staging = JobStaging::create(work.path(), &job).await.unwrap();
        let root = staging.path().to_path_buf();
        assert!(root.starts_with(work.path()));
        assert!(root.file_name().unwrap().to_str().unwrap().starts_with("proxy-a_b-"));
        assert_eq!(staging.source_path(&file).file_name().unwrap(), "source.mov");

        drop(staging);
        assert!(!root.exists());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
    }
}
