//! Service configuration and the file-backed scenario catalog.

use crate::error::{Error, Result};
use crate::types::{ModelDescriptor, Region, ScenarioDescriptor};
use paths::PathExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which capture path feeds the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// External process emits MJPEG; frames are split on JPEG markers.
    Software,
    /// External process emits an Annex-B elementary stream for a hardware
    /// decode session.
    Hardware,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// RTSP lower transport, "udp" or "tcp".
    pub transport: String,
    pub frame_rate: f64,
    pub decoder: DecoderKind,
    pub ffmpeg_path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            transport: "udp".to_string(),
            frame_rate: 1.0,
            decoder: DecoderKind::Software,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub name: String,
}

/// Top-level service configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceInfo,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    /// Scenario id to scenario file.
    #[serde(default)]
    pub scenarios: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub active_scenarios: Vec<String>,
    /// Tuning block consumed by the inference crate; kept verbatim here.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub eye: serde_json::Value,
    /// Directory relative paths were resolved against.
    #[serde(skip)]
    root: PathBuf,
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceInfo::default(),
            stream: StreamConfig::default(),
            capture_dir: default_capture_dir(),
            scenarios: BTreeMap::new(),
            active_scenarios: Vec::new(),
            eye: serde_json::Value::Null,
            root: PathBuf::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads a config file, resolving scenario and capture paths against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config: ServiceConfig = serde_json::from_str(&content)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        config.capture_dir = config.capture_dir.resolve_against(&root);
        for file in config.scenarios.values_mut() {
            *file = file.resolve_against(&root);
        }
        config.root = root;
        info!(
            "Loaded service config {:?} with {} scenarios",
            path,
            config.scenarios.len()
        );
        Ok(config)
    }

    /// Writes the config back, storing paths relative to the load directory
    /// where possible.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut stored = self.clone();
        stored.capture_dir = stored.capture_dir.relative_to(&self.root);
        for file in stored.scenarios.values_mut() {
            *file = file.relative_to(&self.root);
        }
        let json = serde_json::to_string_pretty(&stored)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json + "\n")?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::Io(e)
        })?;
        debug!("Saved service config to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let fps = self.stream.frame_rate;
        if !fps.is_finite() || fps <= 0.0 || fps > 120.0 {
            return Err("Stream frame rate must be in (0, 120]".to_string());
        }
        match self.stream.transport.as_str() {
            "udp" | "tcp" => {}
            other => return Err(format!("Unsupported RTSP transport '{}'", other)),
        }
        if self.stream.ffmpeg_path.trim().is_empty() {
            return Err("ffmpeg path cannot be empty".to_string());
        }
        for id in &self.active_scenarios {
            if !self.scenarios.contains_key(id) {
                return Err(format!("Active scenario '{}' has no scenario file", id));
            }
        }
        Ok(())
    }

    /// Replaces the active list, keeping only ids the config knows about.
    pub fn set_active_scenarios(&mut self, ids: &[String]) {
        let mut active: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.scenarios.contains_key(id) && !active.contains(id) {
                active.push(id.clone());
            }
        }
        self.active_scenarios = active;
    }
}

/// Supplies scenario definitions by id.
pub trait ScenarioCatalog: Send + Sync {
    /// Whether a static definition exists for `id`.
    fn contains(&self, id: &str) -> bool;

    /// Reads the definition. Called synchronously during activation.
    fn descriptor(&self, id: &str) -> Result<ScenarioDescriptor>;

    fn ids(&self) -> Vec<String>;
}

/// Scenario file layout. The first model is the scenario model.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default = "default_threshold")]
    threshold: f64,
    #[serde(default)]
    detection_regions: Vec<Region>,
    #[serde(default)]
    filter_regions: Vec<Region>,
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

fn default_threshold() -> f64 {
    0.5
}

/// Reads scenario files listed in the service config, one file per lookup.
pub struct JsonScenarioCatalog {
    files: BTreeMap<String, PathBuf>,
}

impl JsonScenarioCatalog {
    pub fn new(files: BTreeMap<String, PathBuf>) -> Self {
        Self { files }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.scenarios.clone())
    }

    pub fn parse_scenario(id: &str, path: &Path, content: &str) -> Result<ScenarioDescriptor> {
        let file: ScenarioFile = serde_json::from_str(content)?;
        let mut models = file.models.into_iter();
        let mut model = models.next().ok_or_else(|| {
            Error::Configuration(format!("scenario '{}' defines no model", id))
        })?;
        if models.next().is_some() {
            debug!("Scenario {} lists extra models; only the first is used", id);
        }
        if let Some(dir) = path.parent() {
            model.weights_path = model.weights_path.resolve_against(dir);
        }
        if !(0.0..=1.0).contains(&file.threshold) || !(0.0..=1.0).contains(&model.threshold) {
            return Err(Error::Configuration(format!(
                "scenario '{}' threshold must be within [0, 1]",
                id
            )));
        }
        for region in file.detection_regions.iter().chain(&file.filter_regions) {
            region.validate().map_err(Error::Configuration)?;
        }
        Ok(ScenarioDescriptor {
            id: if file.id.is_empty() { id.to_string() } else { file.id },
            name: file.name,
            detection_regions: file.detection_regions,
            filter_regions: file.filter_regions,
            threshold: file.threshold,
            model,
        })
    }
}

impl ScenarioCatalog for JsonScenarioCatalog {
    fn contains(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    fn descriptor(&self, id: &str) -> Result<ScenarioDescriptor> {
        let path = self
            .files
            .get(id)
            .ok_or_else(|| Error::UnknownScenario(id.to_string()))?;
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read scenario file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_scenario(id, path, &content)
    }

    fn ids(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// Catalog over descriptors already in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    descriptors: HashMap<String, ScenarioDescriptor>,
}

impl InMemoryCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = ScenarioDescriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        }
    }
}

impl ScenarioCatalog for InMemoryCatalog {
    fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    fn descriptor(&self, id: &str) -> Result<ScenarioDescriptor> {
        self.descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownScenario(id.to_string()))
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.descriptors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

mod paths {
    use std::path::{Path, PathBuf};

    pub trait PathExt {
        fn resolve_against(&self, root: &Path) -> PathBuf;
        fn relative_to(&self, root: &Path) -> PathBuf;
    }

    impl PathExt for PathBuf {
        fn resolve_against(&self, root: &Path) -> PathBuf {
            if self.as_os_str().is_empty() || self.is_absolute() {
                self.clone()
            } else {
                root.join(self)
            }
        }

        fn relative_to(&self, root: &Path) -> PathBuf {
            if root.as_os_str().is_empty() {
                return self.clone();
            }
            self.strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| self.clone())
        }
    }
}
