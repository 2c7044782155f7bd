//! Processors run against real media. Skipped when FFmpeg is missing.

mod common;

use std::path::Path;
use std::time::Duration;

use image::GenericImageView;
use mflow_media::FfmpegRunner;
use mflow_models::{
    AssetKind, FileId, FilmstripManifest, FilmstripSettings, Job, JobPayload, JobType, ProxyLadder, ProxyRung,
    SourceFile, TechnicalMetadata, ThumbnailSettings, WaveformData, WaveformSettings,
};
use mflow_worker::processors::{
    Artifact, ArtifactBody, FilmstripProcessor, MetadataProcessor, ProxyProcessor, ThumbnailProcessor,
    WaveformProcessor,
};
use mflow_worker::{Processor, ProcessorInput, ProcessorOutput};

fn input(
    dir: &Path,
    source: &Path,
    mime: &str,
    job_type: JobType,
    metadata: Option<TechnicalMetadata>,
) -> ProcessorInput {
    let work_dir = dir.join(job_type.as_str());
    std::fs::create_dir_all(&work_dir).unwrap();
    ProcessorInput {
        job: Job::new(FileId::from("clip"), job_type, JobPayload::new("uploads/clip", mime), 3),
        file: SourceFile::new("clip", "uploads/clip", mime, 1),
        metadata,
        source_path: source.to_path_buf(),
        work_dir,
        runner: FfmpegRunner::new(),
    }
}

fn artifacts(output: ProcessorOutput) -> Vec<Artifact> {
    match output {
        ProcessorOutput::Artifacts(artifacts) => artifacts,
        other => panic!("expected artifacts, got {:?}", other),
    }
}

fn bytes(artifact: &Artifact) -> Vec<u8> {
    match &artifact.body {
        ArtifactBody::Bytes(data) => data.to_vec(),
        ArtifactBody::File(path) => std::fs::read(path).unwrap(),
    }
}

async fn probe(dir: &Path, source: &Path) -> TechnicalMetadata {
    let output = MetadataProcessor::new(Duration::from_secs(30))
        .process(&input(dir, source, "video/mp4", JobType::Metadata, None))
        .await
        .unwrap();
    match output {
        ProcessorOutput::Metadata(metadata) => metadata,
        other => panic!("expected metadata, got {:?}", other),
    }
}

#[tokio::test]
async fn test_real_clip_through_every_processor() {
    let Some(ffmpeg) = common::ffmpeg().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("clip.mp4");
    common::make_clip(&ffmpeg, &source, 3).await;

    let metadata = probe(dir.path(), &source).await;
    assert!(metadata.has_video && metadata.has_audio);
    assert_eq!(metadata.height, Some(540));
    assert!(!metadata.is_hdr);
    assert!((metadata.duration - 3.0).abs() < 0.5);

    // Thumbnails: three JPEGs, never upscaled past the 960px source
    let thumbs = artifacts(
        ThumbnailProcessor::new(ThumbnailSettings::default(), Duration::from_secs(30))
            .process(&input(dir.path(), &source, "video/mp4", JobType::Thumbnail, Some(metadata.clone())))
            .await
            .unwrap(),
    );
    assert_eq!(thumbs.len(), 3);
    let largest = image::load_from_memory(&bytes(&thumbs[2])).unwrap();
    assert_eq!(largest.dimensions().0, 960);

    // Waveform: normalized peaks of a steady tone
    let waveform = artifacts(
        WaveformProcessor::new(WaveformSettings::default(), Duration::from_secs(30), 1.0)
            .process(&input(dir.path(), &source, "video/mp4", JobType::Waveform, Some(metadata.clone())))
            .await
            .unwrap(),
    );
    assert_eq!(waveform[0].kind, AssetKind::WaveformJson);
    let data: WaveformData = serde_json::from_slice(&bytes(&waveform[0])).unwrap();
    assert_eq!(data.sample_rate, 48_000);
    assert!(!data.peaks.is_empty());
    assert!(data.peaks.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(data.peaks.iter().cloned().fold(0.0f32, f32::max) > 0.99);

    // Filmstrip: the sprite matches the manifest grid
    let settings = FilmstripSettings::default();
    let strip = artifacts(
        FilmstripProcessor::new(settings.clone(), Duration::from_secs(30), 1.0)
            .process(&input(dir.path(), &source, "video/mp4", JobType::Filmstrip, Some(metadata.clone())))
            .await
            .unwrap(),
    );
    let manifest: FilmstripManifest = serde_json::from_slice(&bytes(&strip[1])).unwrap();
    assert_eq!(manifest.total_frames, settings.total_frames(metadata.duration));
    let sprite = image::load_from_memory(&bytes(&strip[0])).unwrap();
    assert_eq!(
        sprite.dimensions(),
        (manifest.columns * manifest.width, manifest.rows * manifest.height)
    );
}

#[tokio::test]
async fn test_proxy_keeps_rungs_that_encode() {
    let Some(ffmpeg) = common::ffmpeg().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("clip.mp4");
    common::make_clip(&ffmpeg, &source, 2).await;
    let metadata = probe(dir.path(), &source).await;

    let mut broken = ProxyRung::new(AssetKind::Proxy540p, 540, 1_500);
    broken.preset = "no-such-preset".to_string();
    let ladder = ProxyLadder {
        rungs: vec![ProxyRung::new(AssetKind::Proxy360p, 360, 800), broken],
        ..ProxyLadder::default()
    };

    let encoded = artifacts(
        ProxyProcessor::new(ladder, Duration::from_secs(60), 2.0)
            .process(&input(dir.path(), &source, "video/mp4", JobType::Proxy, Some(metadata)))
            .await
            .unwrap(),
    );
    assert_eq!(encoded.len(), 1);
    assert_eq!(encoded[0].kind, AssetKind::Proxy360p);
    assert!(!bytes(&encoded[0]).is_empty());
}

#[tokio::test]
async fn test_image_outside_decoder_set_uses_ffmpeg() {
    let Some(ffmpeg) = common::ffmpeg().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("scan.tga");
    common::make_tga(&ffmpeg, &source).await;

    let thumbs = artifacts(
        ThumbnailProcessor::new(ThumbnailSettings::default(), Duration::from_secs(30))
            .process(&input(dir.path(), &source, "image/x-tga", JobType::Thumbnail, None))
            .await
            .unwrap(),
    );
    assert_eq!(thumbs.len(), 3);
    let small = image::load_from_memory(&bytes(&thumbs[0])).unwrap();
    assert_eq!(small.dimensions(), (320, 240));
}
