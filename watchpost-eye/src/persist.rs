//! Captured frame persistence

use crate::error::VisionError;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use watchpost_core::CapturedFrame;

/// Stores captured frames and returns where each one went.
pub trait FrameSink: Send + Sync {
    fn save(&self, scenario_id: &str, index: usize, frame: &CapturedFrame) -> Result<PathBuf, VisionError>;
}

/// Writes frames to `<root>/<service>/<scenario>/frame_NNNNNN.<ext>`.
#[derive(Debug, Clone)]
pub struct DiskFrameSink {
    root: PathBuf,
    service: String,
}

impl DiskFrameSink {
    pub fn new(root: impl Into<PathBuf>, service: &str) -> Self {
        Self {
            root: root.into(),
            service: sanitize_component(service),
        }
    }
}

/// Keeps ASCII alphanumerics, `-`, `_` and `.`; names that end up empty or
/// made only of dots become `captures`.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if sanitized.chars().all(|c| c == '.') {
        "captures".to_string()
    } else {
        sanitized
    }
}

impl FrameSink for DiskFrameSink {
    fn save(&self, scenario_id: &str, index: usize, frame: &CapturedFrame) -> Result<PathBuf, VisionError> {
        if frame.payload().is_empty() {
            return Err(VisionError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "frame has no payload",
            )));
        }
        let dir = self
            .root
            .join(&self.service)
            .join(sanitize_component(scenario_id));
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "frame_{:06}.{}",
            index,
            frame.encoding().extension()
        ));
        fs::write(&path, frame.payload())?;
        debug!("Saved frame {} to {:?}", index, path);
        Ok(path)
    }
}
