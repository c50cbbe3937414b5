//! YOLO-family object detector

use super::engine::{input_size, InferenceEngine};
use super::{label_for, DetectRequest, Detector};
use crate::codec::{frame_to_rgb, DetectionCodec};
use crate::error::VisionError;
use std::sync::Arc;
use tracing::debug;
use watchpost_core::Detection;

pub struct YoloDetector {
    engine: Arc<dyn InferenceEngine>,
    codec: DetectionCodec,
    labels: Vec<String>,
    input_size: (u32, u32),
}

impl YoloDetector {
    /// `default_input` is used for dimensions the model leaves dynamic.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        codec: DetectionCodec,
        labels: Vec<String>,
        default_input: (u32, u32),
    ) -> Self {
        let input_size = input_size(engine.as_ref(), default_input);
        Self {
            engine,
            codec,
            labels,
            input_size,
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}

impl Detector for YoloDetector {
    fn detect(&self, request: &DetectRequest<'_>) -> Result<Vec<Detection>, VisionError> {
        let image = frame_to_rgb(request.frame)?;
        let (width, height) = self.input_size;
        let prepared = self.codec.prepare(&image, width, height)?;
        let output = self
            .engine
            .run(prepared.tensor, [1, 3, height as usize, width as usize])?;

        // Labels pin the class count only when they were configured.
        let num_classes = (!self.labels.is_empty()).then_some(self.labels.len());
        let candidates = self.codec.decode(
            &output,
            &prepared.transform,
            num_classes,
            request.threshold as f32,
        )?;

        let detections: Vec<Detection> = candidates
            .iter()
            .map(|c| Detection {
                label: label_for(&self.labels, c.class_id),
                region: c.to_region(),
                confidence: c.score as f64,
            })
            .collect();
        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }

    fn release(&self) {
        self.engine.release();
    }
}
