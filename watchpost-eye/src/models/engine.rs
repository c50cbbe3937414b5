//! Inference backend abstraction.

use crate::codec::RawTensor;
use crate::error::VisionError;
use std::sync::Arc;
use watchpost_core::ModelDescriptor;

/// A loaded network taking one f32 NCHW input and producing one f32 output.
pub trait InferenceEngine: Send + Sync {
    /// Declared input shape `[batch, channels, height, width]`; zero marks a
    /// dynamic dimension.
    fn input_shape(&self) -> [usize; 4];

    fn run(&self, input: Vec<f32>, shape: [usize; 4]) -> Result<RawTensor, VisionError>;

    /// Frees the backend session. Later runs fail.
    fn release(&self) {}
}

/// Loads model weights into an engine.
pub trait EngineLoader: Send + Sync {
    fn load(&self, model: &ModelDescriptor) -> Result<Arc<dyn InferenceEngine>, VisionError>;
}

/// Loader for builds without an inference backend.
#[derive(Debug, Default)]
pub struct UnavailableLoader;

impl EngineLoader for UnavailableLoader {
    fn load(&self, model: &ModelDescriptor) -> Result<Arc<dyn InferenceEngine>, VisionError> {
        Err(VisionError::ModelLoad(format!(
            "cannot load {} ({}): built without an inference backend, enable the `onnx` feature",
            model.id,
            model.weights_path.display()
        )))
    }
}

/// The backend compiled into this build.
pub fn default_loader() -> Arc<dyn EngineLoader> {
    #[cfg(feature = "onnx")]
    {
        Arc::new(super::onnx::OnnxLoader::default())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Arc::new(UnavailableLoader)
    }
}

/// Resolves the spatial input size: declared dims win, dynamic ones use `fallback`.
pub(crate) fn input_size(engine: &dyn InferenceEngine, fallback: (u32, u32)) -> (u32, u32) {
    let [_, _, h, w] = engine.input_shape();
    let width = if w > 0 { w as u32 } else { fallback.0 };
    let height = if h > 0 { h as u32 } else { fallback.1 };
    (width, height)
}
