//! Command processing across active scenarios

use crate::capture::FrameSource;
use crate::config::EyeConfig;
use crate::error::VisionError;
use crate::models::DetectRequest;
use crate::persist::FrameSink;
use crate::registry::{ScenarioRegistry, ScenarioRuntime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use watchpost_core::{
    AnalysisResult, CapturedFrame, Command, DetectionResult, FrameResult, ModelSummary, Region,
};

/// Runs commands against the active scenarios.
///
/// One capture is made per scenario. Capture shortfalls are filled with
/// placeholder frames so every result has the expected number of frames;
/// per-frame detector failures yield empty detections rather than failing
/// the command.
pub struct Pipeline {
    registry: Arc<ScenarioRegistry>,
    capture: Arc<dyn FrameSource>,
    sink: Option<Arc<dyn FrameSink>>,
    capture_timeout: Duration,
}

impl Pipeline {
    pub fn new(registry: Arc<ScenarioRegistry>, capture: Arc<dyn FrameSource>, config: &EyeConfig) -> Self {
        Self {
            registry,
            capture,
            sink: None,
            capture_timeout: config.capture_timeout(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ScenarioRegistry> {
        &self.registry
    }

    /// Analyzes every scenario the command names, in order of first mention.
    ///
    /// Fails with [`VisionError::UnknownScenario`] if any id has no
    /// definition. Known but inactive scenarios are skipped.
    pub fn process(&self, command: &Command) -> Result<Vec<AnalysisResult>, VisionError> {
        command.validate()?;
        for region in command.detection_regions.iter().chain(&command.filter_regions) {
            region.validate().map_err(VisionError::Region)?;
        }
        let ids = command.unique_scenario_ids();
        if let Some(unknown) = ids.iter().find(|id| !self.registry.is_known(id)) {
            return Err(VisionError::UnknownScenario(unknown.clone()));
        }

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.registry.lookup(id) {
                Some(runtime) => results.push(self.analyze(&runtime, command)),
                None => info!("Skipping inactive scenario {}", id),
            }
        }
        Ok(results)
    }

    fn analyze(&self, runtime: &ScenarioRuntime, command: &Command) -> AnalysisResult {
        let descriptor = runtime.descriptor();
        let regions: &[Region] = if command.detection_regions.is_empty() {
            &descriptor.detection_regions
        } else {
            &command.detection_regions
        };
        // Only the command decides what is filtered.
        let filters: &[Region] = &command.filter_regions;
        let frame_count = regions.len().max(1);
        let threshold = command
            .threshold
            .unwrap_or_else(|| descriptor.effective_threshold());

        let captured = match self
            .capture
            .capture(command.fps, frame_count, self.capture_timeout)
        {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Capture failed for scenario {}: {}", descriptor.id, e);
                Vec::new()
            }
        };
        if captured.len() < frame_count {
            warn!(
                "Captured {} of {} frames for scenario {}; padding with placeholders",
                captured.len(),
                frame_count,
                descriptor.id
            );
        }

        let mut captured = captured.into_iter();
        let mut frames = Vec::with_capacity(frame_count);
        for index in 0..frame_count {
            let (frame, image_path) = match captured.next() {
                Some(frame) => {
                    let path = self.persist(&descriptor.id, index, &frame);
                    (frame, path)
                }
                None => {
                    let timestamp = index as f64 / command.fps;
                    let seed = placeholder_seed(regions, &descriptor.id);
                    (CapturedFrame::placeholder(timestamp, seed), None)
                }
            };

            let request = DetectRequest {
                frame: &frame,
                threshold,
                regions,
            };
            let detections = match runtime.detect(&request) {
                Ok(detections) => detections,
                Err(e) if frame.is_synthetic() => {
                    debug!("No detections for placeholder frame {}: {}", index, e);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Detection failed on frame {} of scenario {}: {}", index, descriptor.id, e);
                    Vec::new()
                }
            };

            frames.push(FrameResult {
                timestamp: frame.timestamp(),
                image_path,
                detections: detections
                    .into_iter()
                    .map(|d| DetectionResult::tagged(d, filters))
                    .collect(),
                synthetic: frame.is_synthetic(),
            });
        }

        AnalysisResult {
            scenario_id: descriptor.id.clone(),
            model: ModelSummary::from(&descriptor.model),
            frames,
            offline: runtime.is_offline(),
        }
    }

    fn persist(&self, scenario_id: &str, index: usize, frame: &CapturedFrame) -> Option<String> {
        let sink = self.sink.as_ref()?;
        match sink.save(scenario_id, index, frame) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!("Failed to persist frame {} of scenario {}: {}", index, scenario_id, e);
                None
            }
        }
    }
}

/// Seed bytes for a placeholder frame: region geometry followed by the scenario id.
fn placeholder_seed(regions: &[Region], scenario_id: &str) -> Vec<u8> {
    let mut seed = Vec::with_capacity(regions.len() * 2 + scenario_id.len());
    for r in regions {
        seed.push((r.x.wrapping_add(r.y) & 0xFF) as u8);
        seed.push((r.width.wrapping_add(r.height) & 0xFF) as u8);
    }
    seed.extend_from_slice(scenario_id.as_bytes());
    seed
}
