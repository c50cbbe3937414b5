//! Region classifier for single-ROI scenarios

use super::engine::{input_size, InferenceEngine};
use super::{label_for, DetectRequest, Detector};
use crate::codec::{chw_tensor, frame_to_rgb};
use crate::error::VisionError;
use image::imageops::{self, FilterType};
use std::sync::Arc;
use watchpost_core::{Detection, Region};

/// Classifies one region of the frame.
///
/// The region is the single requested region when exactly one is given,
/// otherwise the whole frame. The crop is resized to the model input and
/// scaled to `[-1, 1]`. A detection is reported for the winning class when
/// its probability clears the threshold.
///
/// Two-way models with a single configured label are treated as
/// negative/positive: index 1 is the positive class and carries the label.
pub struct CnnClassifier {
    engine: Arc<dyn InferenceEngine>,
    labels: Vec<String>,
    input_size: (u32, u32),
}

impl CnnClassifier {
    pub fn new(engine: Arc<dyn InferenceEngine>, labels: Vec<String>, default_input: (u32, u32)) -> Self {
        let input_size = input_size(engine.as_ref(), default_input);
        Self {
            engine,
            labels,
            input_size,
        }
    }

    fn pick(&self, probs: &[f32]) -> Result<(String, f32), VisionError> {
        if probs.is_empty() {
            return Err(VisionError::Inference("classifier produced no scores".to_string()));
        }
        if probs.len() == 2 && self.labels.len() <= 1 {
            let label = self
                .labels
                .first()
                .cloned()
                .unwrap_or_else(|| "class_1".to_string());
            return Ok((label, probs[1]));
        }
        let (index, p) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        Ok((label_for(&self.labels, index), p))
    }
}

/// Raw outputs are used as probabilities when they already lie in `[0, 1]`;
/// anything else is treated as logits.
fn probabilities(raw: &[f32]) -> Vec<f32> {
    if raw.iter().all(|v| (0.0..=1.0).contains(v)) {
        return raw.to_vec();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; raw.len()]
    }
}

impl Detector for CnnClassifier {
    fn detect(&self, request: &DetectRequest<'_>) -> Result<Vec<Detection>, VisionError> {
        let image = frame_to_rgb(request.frame)?;
        let (iw, ih) = image.dimensions();
        let roi = match request.regions {
            [single] => *single,
            _ => Region::new(0, 0, iw as i32, ih as i32),
        };
        if !roi.fits_within(iw, ih) {
            return Err(VisionError::Region(format!(
                "region {:?} does not fit a {}x{} frame",
                roi, iw, ih
            )));
        }

        let crop = imageops::crop_imm(
            &image,
            roi.x as u32,
            roi.y as u32,
            roi.width as u32,
            roi.height as u32,
        )
        .to_image();
        let (width, height) = self.input_size;
        let resized = imageops::resize(&crop, width, height, FilterType::Triangle);
        let output = self.engine.run(
            chw_tensor(&resized, 2.0, -1.0),
            [1, 3, height as usize, width as usize],
        )?;

        let (label, p) = self.pick(&probabilities(&output.data))?;
        if (p as f64) > request.threshold {
            Ok(vec![Detection {
                label,
                region: roi,
                confidence: p as f64,
            }])
        } else {
            Ok(Vec::new())
        }
    }

    fn release(&self) {
        self.engine.release();
    }
}
