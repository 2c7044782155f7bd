use async_trait::async_trait;
use std::time::Duration;

use mflow_media::extract_metadata;
use mflow_models::JobType;

use super::{Processor, ProcessorInput, ProcessorOutput};
use crate::error::{ProcessorError, ProcessorResult};

/// Probes the source and maps it into technical metadata.
pub struct MetadataProcessor {
    timeout: Duration,
}

impl MetadataProcessor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Processor for MetadataProcessor {
    fn job_type(&self) -> JobType {
        JobType::Metadata
    }

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput> {
        let runner = input.runner.clone().with_timeout(self.timeout);
        let mut metadata = extract_metadata(&runner, &input.source_path)
            .await
            .map_err(ProcessorError::from_probe)?;

        if metadata.size_bytes.is_none() {
            metadata.size_bytes = Some(input.file.size_bytes);
        }

        Ok(ProcessorOutput::Metadata(metadata))
    }
}
