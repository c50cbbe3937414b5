//! Active scenario registry.
//!
//! Maps scenario ids to shared runtime handles. Lookups take the read lock and
//! clone the handle, so a worker keeps its runtime alive even if the scenario is
//! deactivated mid-analysis; the model is released when the last handle drops.
//! Model loading happens outside the map lock, serialized per scenario id.

use crate::error::VisionError;
use crate::models::{DetectRequest, Detector, DetectorFactory};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use watchpost_core::{Detection, ScenarioCatalog, ScenarioDescriptor};

/// A scenario whose model is loaded and ready.
pub struct ScenarioRuntime {
    descriptor: ScenarioDescriptor,
    detector: Box<dyn Detector>,
    activated_at: Instant,
}

impl ScenarioRuntime {
    pub fn new(descriptor: ScenarioDescriptor, detector: Box<dyn Detector>) -> Self {
        Self {
            descriptor,
            detector,
            activated_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ScenarioDescriptor {
        &self.descriptor
    }

    pub fn detect(&self, request: &DetectRequest<'_>) -> Result<Vec<Detection>, VisionError> {
        self.detector.detect(request)
    }

    pub fn is_offline(&self) -> bool {
        self.detector.is_offline()
    }

    pub fn activated_at(&self) -> Instant {
        self.activated_at
    }
}

impl Drop for ScenarioRuntime {
    fn drop(&mut self) {
        self.detector.release();
        info!("Released model {} for scenario {}", self.descriptor.model.id, self.descriptor.id);
    }
}

/// Shared reference to an active scenario.
pub type ScenarioHandle = Arc<ScenarioRuntime>;

pub struct ScenarioRegistry {
    catalog: Arc<dyn ScenarioCatalog>,
    factory: Arc<dyn DetectorFactory>,
    scenarios: RwLock<HashMap<String, ScenarioHandle>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScenarioRegistry {
    pub fn new(catalog: Arc<dyn ScenarioCatalog>, factory: Arc<dyn DetectorFactory>) -> Self {
        Self {
            catalog,
            factory,
            scenarios: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Per-id activation lock. Only created for ids the catalog defines, so
    /// the map stays bounded by the catalog.
    fn gate(&self, id: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Loads the scenario model and publishes it. A no-op for active
    /// scenarios. On failure nothing is published.
    pub fn activate(&self, id: &str) -> Result<(), VisionError> {
        if self.is_active(id) {
            debug!("Scenario {} already active", id);
            return Ok(());
        }
        if !self.catalog.contains(id) {
            return Err(VisionError::UnknownScenario(id.to_string()));
        }
        let gate = self.gate(id);
        let _guard = gate.lock();
        if self.is_active(id) {
            debug!("Scenario {} was activated concurrently", id);
            return Ok(());
        }

        let descriptor = self.catalog.descriptor(id)?;
        let detector = self.factory.build(&descriptor).map_err(|e| {
            warn!("Failed to activate scenario {}: {}", id, e);
            e
        })?;
        let runtime = Arc::new(ScenarioRuntime::new(descriptor, detector));
        self.scenarios.write().insert(id.to_string(), runtime);
        info!("Scenario {} activated", id);
        Ok(())
    }

    /// Unpublishes the scenario. In-flight handles stay valid until dropped.
    /// Unknown or inactive ids are ignored.
    pub fn deactivate(&self, id: &str) {
        if !self.catalog.contains(id) {
            debug!("Scenario {} is not defined", id);
            return;
        }
        let gate = self.gate(id);
        let _guard = gate.lock();
        let removed = self.scenarios.write().remove(id);
        match removed {
            Some(runtime) => {
                let outstanding = Arc::strong_count(&runtime) - 1;
                if outstanding > 0 {
                    info!("Scenario {} deactivated, {} handles still in use", id, outstanding);
                } else {
                    info!("Scenario {} deactivated", id);
                }
            }
            None => debug!("Scenario {} was not active", id),
        }
    }

    /// Brings the active set to exactly `ids`. Returns the activations that
    /// failed; the rest of the set is still applied.
    pub fn sync(&self, ids: &[String]) -> Vec<(String, VisionError)> {
        for id in self.active_ids() {
            if !ids.contains(&id) {
                self.deactivate(&id);
            }
        }
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.activate(id) {
                failures.push((id.clone(), e));
            }
        }
        failures
    }

    pub fn lookup(&self, id: &str) -> Option<ScenarioHandle> {
        self.scenarios.read().get(id).cloned()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.scenarios.read().contains_key(id)
    }

    /// Whether the catalog has a definition for `id`, active or not.
    pub fn is_known(&self, id: &str) -> bool {
        self.catalog.contains(id)
    }

    /// Active ids, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scenarios.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.scenarios.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.read().is_empty()
    }
}
