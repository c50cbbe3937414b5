//! Analysis commands delivered by the transport.

use crate::error::{Error, Result};
use crate::types::Region;
use serde::{Deserialize, Serialize};

/// A request to analyze the live stream for one or more scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand")]
pub struct Command {
    pub scenario_ids: Vec<String>,
    pub detection_regions: Vec<Region>,
    pub filter_regions: Vec<Region>,
    /// Overrides the scenario confidence floor when present.
    pub threshold: Option<f64>,
    pub fps: f64,
    pub activation_code: String,
    pub extra: serde_json::Value,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(default)]
    scenario_ids: Vec<String>,
    #[serde(default)]
    scenario_id: Option<String>,
    #[serde(default)]
    detection_regions: Vec<Region>,
    #[serde(default)]
    filter_regions: Vec<Region>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    activation_code: String,
    #[serde(default)]
    extra: Option<serde_json::Value>,
}

impl TryFrom<RawCommand> for Command {
    type Error = String;

    fn try_from(raw: RawCommand) -> std::result::Result<Self, Self::Error> {
        let mut scenario_ids = raw.scenario_ids;
        if let Some(id) = raw.scenario_id {
            if !scenario_ids.contains(&id) {
                scenario_ids.push(id);
            }
        }
        let fps = match raw.fps {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            _ => 1.0,
        };
        Ok(Command {
            scenario_ids,
            detection_regions: raw.detection_regions,
            filter_regions: raw.filter_regions,
            threshold: raw.threshold,
            fps,
            activation_code: raw.activation_code,
            extra: raw
                .extra
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        })
    }
}

impl Command {
    pub fn new(scenario_ids: Vec<String>) -> Self {
        Self {
            scenario_ids,
            detection_regions: Vec::new(),
            filter_regions: Vec::new(),
            threshold: None,
            fps: 1.0,
            activation_code: String::new(),
            extra: serde_json::Value::Object(Default::default()),
        }
    }

    /// Parses a payload holding either one command object or an array of them.
    pub fn parse_many(payload: &str) -> Result<Vec<Command>> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(Error::from))
                .collect(),
            serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
            _ => Err(Error::InvalidCommand(
                "commands must be a JSON object or array".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenario_ids.is_empty() {
            return Err(Error::InvalidCommand(
                "command must name at least one scenario".to_string(),
            ));
        }
        if self.scenario_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::InvalidCommand("scenario id cannot be empty".to_string()));
        }
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::InvalidCommand(format!(
                    "threshold {} is outside [0, 1]",
                    threshold
                )));
            }
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::InvalidCommand(format!("fps {} must be positive", self.fps)));
        }
        Ok(())
    }

    /// Scenario ids with duplicates removed, first occurrence kept.
    pub fn unique_scenario_ids(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.scenario_ids.len());
        for id in &self.scenario_ids {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        seen
    }
}
