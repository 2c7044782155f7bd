use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use mflow_media::{transcode, transcode_timeout, TranscodeSpec};
use mflow_models::{JobType, ProxyLadder, ProxyRung, TechnicalMetadata};

use super::{Artifact, Processor, ProcessorInput, ProcessorOutput};
use crate::error::{ProcessorError, ProcessorResult};

/// One planned rendition.
#[derive(Debug, Clone)]
pub struct ProxyPlan {
    pub rung: ProxyRung,
    pub spec: TranscodeSpec,
}

/// Encodes the streaming proxy ladder. Rungs encode independently; the job
/// fails only when none of them succeeds.
pub struct ProxyProcessor {
    ladder: ProxyLadder,
    timeout_base: Duration,
    timeout_factor: f64,
}

impl ProxyProcessor {
    pub fn new(ladder: ProxyLadder, timeout_base: Duration, timeout_factor: f64) -> Self {
        Self {
            ladder,
            timeout_base,
            timeout_factor,
        }
    }

    /// Renditions for a source, lowest first. HDR sources are tone-mapped
    /// in every rung.
    pub fn plan(&self, metadata: &TechnicalMetadata) -> ProcessorResult<Vec<ProxyPlan>> {
        if !metadata.has_video {
            return Err(ProcessorError::unsupported("source has no video stream"));
        }
        let height = metadata
            .display_height()
            .ok_or_else(|| ProcessorError::unsupported("video stream has no dimensions"))?;

        Ok(self
            .ladder
            .select(height)
            .into_iter()
            .map(|rung| {
                let spec = TranscodeSpec::for_rung(&rung, &self.ladder, metadata.is_hdr, metadata.has_audio);
                ProxyPlan { rung, spec }
            })
            .collect())
    }
}

#[async_trait]
impl Processor for ProxyProcessor {
    fn job_type(&self) -> JobType {
        JobType::Proxy
    }

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput> {
        let metadata = input.require_metadata()?;
        let plans = self.plan(metadata)?;
        let timeout = transcode_timeout(self.timeout_base, self.timeout_factor, metadata.duration);
        let runner = input.runner.clone().with_timeout(timeout);

        let mut artifacts = Vec::with_capacity(plans.len());
        let mut failures = Vec::new();

        for plan in &plans {
            let output = input.work_dir.join(format!("{}.mp4", plan.rung.kind));
            match transcode(&runner, &input.source_path, &output, &plan.spec, metadata.duration).await {
                Ok(()) => {
                    info!(rung = %plan.rung.label(), tone_map = plan.spec.tone_map, "Proxy rung encoded");
                    artifacts.push(Artifact::file(plan.rung.kind, output));
                }
                Err(mflow_media::MediaError::Cancelled) => return Err(ProcessorError::Cancelled),
                Err(e) => {
                    warn!(rung = %plan.rung.label(), "Proxy rung failed: {}", e);
                    failures.push(format!("{}: {}", plan.rung.label(), e.diagnostic()));
                }
            }
        }

        if artifacts.is_empty() {
            return Err(ProcessorError::transcode(format!(
                "every proxy rung failed\n{}",
                failures.join("\n")
            )));
        }
        if !failures.is_empty() {
            warn!(
                succeeded = artifacts.len(),
                failed = failures.len(),
                "Proxy ladder partially encoded"
            );
        }

        Ok(ProcessorOutput::Artifacts(artifacts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_models::{AssetKind, HdrType};

    fn processor() -> ProxyProcessor {
        ProxyProcessor::new(ProxyLadder::default(), Duration::from_secs(60), 2.0)
    }

    fn video(width: u32, height: u32) -> TechnicalMetadata {
        TechnicalMetadata {
            duration: 5.0,
            width: Some(width),
            height: Some(height),
            has_video: true,
            has_audio: true,
            ..Default::default()
        }
    }

    fn kinds(plans: &[ProxyPlan]) -> Vec<AssetKind> {
        plans.iter().map(|p| p.rung.kind).collect()
    }

    #[test]
    fn test_rungs_never_upscale() {
        let plans = processor().plan(&video(1422, 800)).unwrap();
        assert_eq!(
            kinds(&plans),
            vec![AssetKind::Proxy360p, AssetKind::Proxy540p, AssetKind::Proxy720p]
        );
        assert!(plans.iter().all(|p| !p.spec.tone_map));
    }

    #[test]
    fn test_hdr_rungs_are_tone_mapped() {
        let mut meta = video(2560, 1440);
        meta.is_hdr = true;
        meta.hdr_type = HdrType::Hdr10;

        let plans = processor().plan(&meta).unwrap();
        assert_eq!(
            kinds(&plans),
            vec![
                AssetKind::Proxy360p,
                AssetKind::Proxy540p,
                AssetKind::Proxy720p,
                AssetKind::Proxy1080p
            ]
        );
        for plan in &plans {
            let filter = plan.spec.video_filter();
            assert!(filter.contains("tonemap=hable"));
            assert!(filter.find("tonemap").unwrap() < filter.find("scale=-2:").unwrap());
        }
    }

    #[test]
    fn test_tiny_source_gets_native_rung() {
        let plans = processor().plan(&video(320, 241)).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].rung.kind, AssetKind::Proxy360p);
        assert_eq!(plans[0].rung.height, 240);
    }

    #[test]
    fn test_audio_only_is_unsupported() {
        let meta = TechnicalMetadata {
            duration: 5.0,
            has_audio: true,
            ..Default::default()
        };
        assert!(matches!(processor().plan(&meta), Err(ProcessorError::Unsupported(_))));
    }
}
