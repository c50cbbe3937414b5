//! Wiring of config, registry, capture and pipeline for the binary

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use watchpost_core::{DecoderKind, JsonScenarioCatalog, ServiceConfig, StreamConfig};
use watchpost_eye::capture::{FfmpegLauncher, NoHardwareSessions, StreamMode};
use watchpost_eye::models::{default_loader, ModelFactory};
use watchpost_eye::{
    DiskFrameSink, EyeConfig, FrameDemuxer, FrameSource, HardwareFrameDecoder, Pipeline,
    ScenarioRegistry,
};

/// Overrides taken from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    pub offline: bool,
    pub persist: bool,
}

pub struct Runtime {
    pub config_path: PathBuf,
    pub config: ServiceConfig,
    pub eye: EyeConfig,
    pub pipeline: Arc<Pipeline>,
}

impl Runtime {
    pub fn registry(&self) -> &Arc<ScenarioRegistry> {
        self.pipeline.registry()
    }

    /// Writes the current active set back to the service config file.
    pub fn save_active(&mut self, ids: &[String]) -> Result<()> {
        self.config.set_active_scenarios(ids);
        self.config
            .save(&self.config_path)
            .with_context(|| format!("failed to save {}", self.config_path.display()))
    }
}

pub fn load_config(path: &Path) -> Result<(ServiceConfig, EyeConfig)> {
    let config = ServiceConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid service config {}: {}", path.display(), e))?;
    let eye = EyeConfig::from_value(&config.eye).context("invalid eye section")?;
    Ok((config, eye))
}

pub fn build(config_path: &Path, options: RuntimeOptions) -> Result<Runtime> {
    let (config, mut eye) = load_config(config_path)?;
    if options.offline {
        eye.offline_detector = true;
    }
    if options.persist {
        eye.persist_frames = true;
    }

    let catalog = Arc::new(JsonScenarioCatalog::from_config(&config));
    let factory = Arc::new(ModelFactory::new(default_loader(), &eye));
    let registry = Arc::new(ScenarioRegistry::new(catalog, factory));

    let mut pipeline = Pipeline::new(registry, capture_source(&config.stream, &eye), &eye);
    if eye.persist_frames {
        info!("Persisting captured frames under {:?}", config.capture_dir);
        pipeline = pipeline.with_sink(Arc::new(DiskFrameSink::new(
            config.capture_dir.clone(),
            &config.service.name,
        )));
    }

    Ok(Runtime {
        config_path: config_path.to_path_buf(),
        config,
        eye,
        pipeline: Arc::new(pipeline),
    })
}

fn capture_source(stream: &StreamConfig, eye: &EyeConfig) -> Arc<dyn FrameSource> {
    let mjpeg = FrameDemuxer::new(
        Arc::new(FfmpegLauncher::new(stream, StreamMode::Mjpeg)),
        eye,
    );
    match stream.decoder {
        DecoderKind::Software => Arc::new(mjpeg),
        DecoderKind::Hardware => {
            // No decode session backend is linked into this binary; every
            // capture goes through the demuxer fallback.
            info!("Hardware decoding requested; using software fallback sessions");
            Arc::new(HardwareFrameDecoder::new(
                Arc::new(FfmpegLauncher::new(stream, StreamMode::AnnexB)),
                Arc::new(NoHardwareSessions),
                mjpeg,
                eye,
            ))
        }
    }
}
