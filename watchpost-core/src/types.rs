use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pixel rectangle; serialized as `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rejects negative extents and offsets.
    pub fn validate(&self) -> Result<(), String> {
        if self.width < 0 || self.height < 0 {
            return Err(format!(
                "region {:?} has negative size {}x{}",
                self, self.width, self.height
            ));
        }
        if self.x < 0 || self.y < 0 {
            return Err(format!("region {:?} has a negative origin", self));
        }
        Ok(())
    }

    /// True when the rectangle lies entirely inside a `width`x`height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        if self.validate().is_err() || self.width == 0 || self.height == 0 {
            return false;
        }
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        right <= width as i64 && bottom <= height as i64
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }
}

impl From<[i32; 4]> for Region {
    fn from(v: [i32; 4]) -> Self {
        Region::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Region> for [i32; 4] {
    fn from(r: Region) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}

/// Pixel layout of a captured frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameEncoding {
    Jpeg,
    Nv12,
    RawBgr,
}

impl FrameEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            FrameEncoding::Jpeg => "jpg",
            FrameEncoding::Nv12 => "nv12",
            FrameEncoding::RawBgr => "bgr",
        }
    }
}

/// One frame pulled from the video source.
///
/// Immutable once built: the payload can only be read or moved out. Width and
/// strides are meaningful for planar encodings only; JPEG frames carry zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    timestamp: f64,
    payload: Vec<u8>,
    encoding: FrameEncoding,
    width: u32,
    height: u32,
    stride: u32,
    uv_stride: u32,
    synthetic: bool,
}

impl CapturedFrame {
    pub fn jpeg(timestamp: f64, payload: Vec<u8>) -> Self {
        Self {
            timestamp,
            payload,
            encoding: FrameEncoding::Jpeg,
            width: 0,
            height: 0,
            stride: 0,
            uv_stride: 0,
            synthetic: false,
        }
    }

    /// Tightly packed NV12: luma plane followed by interleaved chroma.
    pub fn nv12(timestamp: f64, payload: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            timestamp,
            payload,
            encoding: FrameEncoding::Nv12,
            width,
            height,
            stride: width,
            uv_stride: width,
            synthetic: false,
        }
    }

    pub fn raw_bgr(timestamp: f64, payload: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            timestamp,
            payload,
            encoding: FrameEncoding::RawBgr,
            width,
            height,
            stride: width.saturating_mul(3),
            uv_stride: 0,
            synthetic: false,
        }
    }

    /// Stand-in for a frame the source failed to deliver. Carries seed bytes
    /// instead of pixels and has zero dimensions.
    pub fn placeholder(timestamp: f64, seed: Vec<u8>) -> Self {
        Self {
            timestamp,
            payload: seed,
            encoding: FrameEncoding::RawBgr,
            width: 0,
            height: 0,
            stride: 0,
            uv_stride: 0,
            synthetic: true,
        }
    }

    /// Same frame under a new timestamp.
    pub fn restamped(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn encoding(&self) -> FrameEncoding {
        self.encoding
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn uv_stride(&self) -> u32 {
        self.uv_stride
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }
}

/// Detection backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    Cnn,
    Yolo,
}

impl TryFrom<String> for ModelKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let lowered = value.trim().to_ascii_lowercase();
        if lowered == "cnn" {
            Ok(ModelKind::Cnn)
        } else if lowered.starts_with("yolo") {
            Ok(ModelKind::Yolo)
        } else {
            Err(format!("unsupported model type '{}'", value))
        }
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Cnn => write!(f, "cnn"),
            ModelKind::Yolo => write!(f, "yolo"),
        }
    }
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    #[serde(rename = "path")]
    pub weights_path: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Static definition of a scenario, read from the config store on activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub detection_regions: Vec<Region>,
    #[serde(default)]
    pub filter_regions: Vec<Region>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub model: ModelDescriptor,
}

impl ScenarioDescriptor {
    /// Confidence floor used when a command does not override it.
    pub fn effective_threshold(&self) -> f64 {
        self.threshold.max(self.model.threshold)
    }
}

/// Raw model output for one object, before filter tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub region: Region,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: String,
    pub region: Region,
    pub confidence: f64,
    /// Region exactly matches a configured filter region.
    pub filtered: bool,
}

impl DetectionResult {
    pub fn tagged(detection: Detection, filters: &[Region]) -> Self {
        let filtered = filters.contains(&detection.region);
        Self {
            label: detection.label,
            region: detection.region,
            confidence: detection.confidence,
            filtered,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub detections: Vec<DetectionResult>,
    /// Built from a placeholder because capture underproduced.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
}

/// The model fields reported with a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    #[serde(rename = "path")]
    pub weights_path: PathBuf,
}

impl From<&ModelDescriptor> for ModelSummary {
    fn from(model: &ModelDescriptor) -> Self {
        Self {
            id: model.id.clone(),
            kind: model.kind,
            weights_path: model.weights_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub scenario_id: String,
    pub model: ModelSummary,
    #[serde(default)]
    pub frames: Vec<FrameResult>,
    /// Produced by the offline fingerprint detector rather than a real model.
    #[serde(default, skip_serializing_if = "is_false")]
    pub offline: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_serializes_as_array() {
        let region = Region::new(1, 2, 30, 40);
        assert_eq!(serde_json::to_string(&region).unwrap(), "[1,2,30,40]");
        let back: Region = serde_json::from_str("[1,2,30,40]").unwrap();
        assert_eq!(back, region);
    }

    #[test]
    fn test_region_validation() {
        assert!(Region::new(0, 0, 0, 0).validate().is_ok());
        assert!(Region::new(0, 0, -1, 5).validate().is_err());
        assert!(Region::new(-3, 0, 1, 5).validate().is_err());
    }

    #[test]
    fn test_region_fits_within() {
        assert!(Region::new(0, 0, 640, 480).fits_within(640, 480));
        assert!(!Region::new(1, 0, 640, 480).fits_within(640, 480));
        assert!(!Region::new(10, 10, 0, 5).fits_within(640, 480));
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!(ModelKind::try_from("cnn".to_string()).unwrap(), ModelKind::Cnn);
        assert_eq!(ModelKind::try_from("yolov8".to_string()).unwrap(), ModelKind::Yolo);
        assert_eq!(ModelKind::try_from("YOLO".to_string()).unwrap(), ModelKind::Yolo);
        assert!(ModelKind::try_from("resnet".to_string()).is_err());
    }

    #[test]
    fn test_detection_tagging_uses_exact_match() {
        let filters = vec![Region::new(10, 10, 50, 50)];
        let hit = Detection {
            label: "person".to_string(),
            region: Region::new(10, 10, 50, 50),
            confidence: 0.9,
        };
        let near = Detection {
            region: Region::new(10, 10, 50, 51),
            ..hit.clone()
        };
        assert!(DetectionResult::tagged(hit, &filters).filtered);
        assert!(!DetectionResult::tagged(near, &filters).filtered);
    }

    #[test]
    fn test_frame_result_omits_empty_optionals() {
        let frame = FrameResult {
            timestamp: 0.5,
            image_path: None,
            detections: vec![],
            synthetic: false,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("image_path").is_none());
        assert!(json.get("synthetic").is_none());
    }

    #[test]
    fn test_result_model_omits_tuning_fields() {
        let model = ModelDescriptor {
            id: "yolo-smoke".to_string(),
            kind: ModelKind::Yolo,
            weights_path: PathBuf::from("models/smoke.onnx"),
            threshold: 0.4,
            labels: vec!["smoke".to_string()],
        };
        let result = AnalysisResult {
            scenario_id: "smoke".to_string(),
            model: ModelSummary::from(&model),
            frames: vec![],
            offline: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json["model"],
            serde_json::json!({"id": "yolo-smoke", "type": "yolo", "path": "models/smoke.onnx"})
        );
    }

    #[test]
    fn test_placeholder_frame_is_synthetic() {
        let frame = CapturedFrame::placeholder(1.0, vec![1, 2, 3]);
        assert!(frame.is_synthetic());
        assert_eq!(frame.width(), 0);
        assert!(!CapturedFrame::jpeg(0.0, vec![0xFF]).is_synthetic());
    }
}
