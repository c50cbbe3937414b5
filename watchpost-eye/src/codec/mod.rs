//! Detection codec: detector input preparation and output post-processing

pub mod decode;
pub mod letterbox;
pub mod nms;
pub mod pixels;

pub use decode::{decode_candidates, Candidate, OutputLayout, ScoreMode, TensorLayout};
pub use letterbox::{letterbox, LetterboxTransform, Letterboxed, PAD_GRAY};
pub use nms::{iou, non_max_suppression};
pub use pixels::{chw_tensor, frame_to_rgb};

use crate::config::EyeConfig;
use crate::error::VisionError;
use image::RgbImage;
use tracing::debug;

/// A dense f32 tensor returned by an inference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }
}

/// Letterboxing on the way in, layout decoding and NMS on the way out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCodec {
    pub iou_threshold: f32,
    pub top_k: usize,
}

impl DetectionCodec {
    pub fn new(iou_threshold: f32, top_k: usize) -> Self {
        Self {
            iou_threshold,
            top_k: top_k.max(1),
        }
    }

    pub fn from_config(config: &EyeConfig) -> Self {
        Self::new(config.nms_iou_threshold, config.top_k)
    }

    pub fn prepare(
        &self,
        image: &RgbImage,
        input_width: u32,
        input_height: u32,
    ) -> Result<Letterboxed, VisionError> {
        letterbox(image, input_width, input_height)
    }

    /// Decodes `output` into suppressed candidates in source image pixels.
    pub fn decode(
        &self,
        output: &RawTensor,
        transform: &LetterboxTransform,
        num_classes: Option<usize>,
        threshold: f32,
    ) -> Result<Vec<Candidate>, VisionError> {
        let layout = OutputLayout::detect(&output.shape, num_classes)?;
        let candidates = decode_candidates(&output.data, &layout, threshold, transform)?;
        let found = candidates.len();
        let kept = non_max_suppression(candidates, self.iou_threshold, self.top_k);
        debug!("Decoded {} candidates, {} kept after NMS", found, kept.len());
        Ok(kept)
    }
}

impl Default for DetectionCodec {
    fn default() -> Self {
        Self::from_config(&EyeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_runs_nms() {
        let codec = DetectionCodec::default();
        let transform = LetterboxTransform::compute(100, 100, 100, 100).unwrap();
        // Box-major, two overlapping boxes for one class.
        let output = RawTensor::new(
            vec![1, 2, 5],
            vec![
                50.0, 50.0, 20.0, 20.0, 0.9, //
                51.0, 50.0, 20.0, 20.0, 0.8,
            ],
        );
        let kept = codec.decode(&output, &transform, Some(1), 0.5).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
    }
}
