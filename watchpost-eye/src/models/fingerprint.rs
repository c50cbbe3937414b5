//! Deterministic stand-in detector for running without model weights.
//!
//! Results are derived from a SHA-256 digest of the scenario id and frame
//! payload, so the same frame always yields the same detections. Only used
//! when explicitly enabled; results are flagged offline.

use super::{DetectRequest, Detector};
use crate::error::VisionError;
use sha2::{Digest, Sha256};
use tracing::debug;
use watchpost_core::{Detection, Region, ScenarioDescriptor};

pub struct FingerprintDetector {
    scenario_id: String,
    labels: Vec<String>,
}

impl FingerprintDetector {
    pub fn new(scenario: &ScenarioDescriptor) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            labels: scenario.model.labels.clone(),
        }
    }
}

impl Detector for FingerprintDetector {
    fn detect(&self, request: &DetectRequest<'_>) -> Result<Vec<Detection>, VisionError> {
        let mut hasher = Sha256::new();
        hasher.update(self.scenario_id.as_bytes());
        hasher.update(request.frame.payload());
        let digest = hasher.finalize();

        let count = if request.regions.is_empty() {
            (digest[0] % 3) as usize + 1
        } else {
            request.regions.len()
        };

        let mut detections = Vec::with_capacity(count);
        for i in 0..count {
            let offset = (i * 4) % (digest.len() - 4);
            let bytes = &digest[offset..offset + 4];
            let confidence = 0.35 + u16::from_be_bytes([bytes[0], bytes[1]]) as f64 / 65535.0 * 0.63;
            if confidence <= request.threshold {
                continue;
            }
            let region = request.regions.get(i).copied().unwrap_or_else(|| {
                Region::new(
                    bytes[2] as i32 * 4,
                    bytes[3] as i32 * 4,
                    64 + (bytes[0] % 64) as i32,
                    64 + (bytes[1] % 64) as i32,
                )
            });
            let label = if self.labels.is_empty() {
                format!("detected_object_{}", i + 1)
            } else {
                self.labels[i % self.labels.len()].clone()
            };
            detections.push(Detection {
                label,
                region,
                confidence,
            });
        }
        debug!(
            "Fingerprint {} produced {} detections for {}",
            hex::encode(&digest[..4]),
            detections.len(),
            self.scenario_id
        );
        Ok(detections)
    }

    fn release(&self) {}

    fn is_offline(&self) -> bool {
        true
    }
}
