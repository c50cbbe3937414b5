//! ONNX Runtime backend

use super::engine::{EngineLoader, InferenceEngine};
use crate::codec::RawTensor;
use crate::error::VisionError;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use watchpost_core::ModelDescriptor;

/// One ONNX session. Runs are serialized through the session lock.
pub struct OnnxEngine {
    session: Mutex<Option<Session>>,
    input_shape: [usize; 4],
    path: PathBuf,
}

impl OnnxEngine {
    pub fn load(path: &Path, intra_threads: usize) -> Result<Self, VisionError> {
        if !path.exists() {
            return Err(VisionError::ModelLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        let builder = Session::builder()
            .map_err(|e| VisionError::ModelLoad(format!("Failed to create session builder: {}", e)))?;
        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VisionError::ModelLoad(format!("Failed to set optimization level: {}", e)))?;
        let builder = builder
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| VisionError::ModelLoad(format!("Failed to set thread count: {}", e)))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| VisionError::ModelLoad(format!("Failed to load {}: {}", path.display(), e)))?;

        let mut input_shape = [0usize; 4];
        if let Some(dims) = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
        {
            for (slot, dim) in input_shape.iter_mut().zip(dims.iter()) {
                *slot = if *dim > 0 { *dim as usize } else { 0 };
            }
        }
        info!("ONNX model loaded from {:?} (input {:?})", path, input_shape);

        Ok(Self {
            session: Mutex::new(Some(session)),
            input_shape,
            path: path.to_path_buf(),
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn run(&self, input: Vec<f32>, shape: [usize; 4]) -> Result<RawTensor, VisionError> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or_else(|| {
            VisionError::Inference(format!("session for {:?} was released", self.path))
        })?;
        let tensor = Tensor::from_array((shape, input))
            .map_err(|e| VisionError::Inference(format!("Failed to build input tensor: {}", e)))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| VisionError::Inference(format!("Inference failed: {}", e)))?;
        if outputs.len() == 0 {
            return Err(VisionError::Inference("model produced no outputs".to_string()));
        }
        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Inference(format!("Failed to read output tensor: {}", e)))?;
        Ok(RawTensor::new(
            out_shape.iter().map(|&d| d.max(0) as usize).collect(),
            data.to_vec(),
        ))
    }

    fn release(&self) {
        if self.session.lock().take().is_some() {
            info!("Released ONNX session for {:?}", self.path);
        }
    }
}

/// Loads each model into its own session.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    pub intra_threads: usize,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self { intra_threads: 1 }
    }
}

impl EngineLoader for OnnxLoader {
    fn load(&self, model: &ModelDescriptor) -> Result<Arc<dyn InferenceEngine>, VisionError> {
        Ok(Arc::new(OnnxEngine::load(&model.weights_path, self.intra_threads)?))
    }
}
