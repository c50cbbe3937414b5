//! Builds the detector for a scenario

use super::cnn::CnnClassifier;
use super::engine::EngineLoader;
use super::fingerprint::FingerprintDetector;
use super::yolo::YoloDetector;
use super::Detector;
use crate::codec::DetectionCodec;
use crate::config::EyeConfig;
use crate::error::VisionError;
use std::sync::Arc;
use tracing::info;
use watchpost_core::{ModelKind, ScenarioDescriptor};

pub trait DetectorFactory: Send + Sync {
    /// Loads the scenario's model. Any failure is reported as
    /// [`VisionError::ModelLoad`].
    fn build(&self, scenario: &ScenarioDescriptor) -> Result<Box<dyn Detector>, VisionError>;
}

/// Picks the detector implementation from the model kind.
pub struct ModelFactory {
    loader: Arc<dyn EngineLoader>,
    config: EyeConfig,
}

impl ModelFactory {
    pub fn new(loader: Arc<dyn EngineLoader>, config: &EyeConfig) -> Self {
        Self {
            loader,
            config: config.clone(),
        }
    }
}

impl DetectorFactory for ModelFactory {
    fn build(&self, scenario: &ScenarioDescriptor) -> Result<Box<dyn Detector>, VisionError> {
        let model = &scenario.model;
        if self.config.offline_detector {
            info!("Scenario {} uses the offline fingerprint detector", scenario.id);
            return Ok(Box::new(FingerprintDetector::new(scenario)));
        }

        let engine = self.loader.load(model).map_err(|e| match e {
            VisionError::ModelLoad(_) => e,
            other => VisionError::ModelLoad(other.to_string()),
        })?;
        let detector: Box<dyn Detector> = match model.kind {
            ModelKind::Yolo => Box::new(YoloDetector::new(
                engine,
                DetectionCodec::from_config(&self.config),
                model.labels.clone(),
                self.config.yolo_input,
            )),
            ModelKind::Cnn => Box::new(CnnClassifier::new(
                engine,
                model.labels.clone(),
                self.config.cnn_input,
            )),
        };
        info!("Loaded {} model {} for scenario {}", model.kind, model.id, scenario.id);
        Ok(detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::engine::UnavailableLoader;
    use std::path::PathBuf;
    use watchpost_core::ModelDescriptor;

    fn scenario() -> ScenarioDescriptor {
        ScenarioDescriptor {
            id: "s1".to_string(),
            name: String::new(),
            detection_regions: vec![],
            filter_regions: vec![],
            threshold: 0.5,
            model: ModelDescriptor {
                id: "m".to_string(),
                kind: ModelKind::Cnn,
                weights_path: PathBuf::from("missing.onnx"),
                threshold: 0.5,
                labels: vec![],
            },
        }
    }

    #[test]
    fn test_offline_mode_skips_weights() {
        let config = EyeConfig {
            offline_detector: true,
            ..EyeConfig::default()
        };
        let factory = ModelFactory::new(Arc::new(UnavailableLoader), &config);
        let detector = factory.build(&scenario()).unwrap();
        assert!(detector.is_offline());
    }

    #[test]
    fn test_load_failure_is_not_masked() {
        let factory = ModelFactory::new(Arc::new(UnavailableLoader), &EyeConfig::default());
        assert!(matches!(factory.build(&scenario()), Err(VisionError::ModelLoad(_))));
    }
}
