//! Scenario detectors and the inference backends behind them

pub mod cnn;
pub mod engine;
pub mod factory;
pub mod fingerprint;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod yolo;

pub use cnn::CnnClassifier;
pub use engine::{default_loader, EngineLoader, InferenceEngine, UnavailableLoader};
pub use factory::{DetectorFactory, ModelFactory};
pub use fingerprint::FingerprintDetector;
#[cfg(feature = "onnx")]
pub use onnx::{OnnxEngine, OnnxLoader};
pub use yolo::YoloDetector;

use crate::error::VisionError;
use watchpost_core::{CapturedFrame, Detection, Region};

/// Inputs for one detector call.
#[derive(Debug, Clone, Copy)]
pub struct DetectRequest<'a> {
    pub frame: &'a CapturedFrame,
    /// Only detections scoring strictly above this are returned.
    pub threshold: f64,
    /// Regions of interest for this frame, possibly empty.
    pub regions: &'a [Region],
}

/// A loaded scenario model.
///
/// Implementations must tolerate concurrent `detect` calls from several
/// threads.
pub trait Detector: Send + Sync {
    fn detect(&self, request: &DetectRequest<'_>) -> Result<Vec<Detection>, VisionError>;

    /// Frees backend resources. Called once, when the owning scenario is
    /// torn down.
    fn release(&self);

    /// True for detectors that do not run a real model.
    fn is_offline(&self) -> bool {
        false
    }
}

/// Label for class `index`, falling back to `class_<index>` when the label
/// list does not cover it.
pub(crate) fn label_for(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", index))
}
