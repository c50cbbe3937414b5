//! watchpost-core: shared vocabulary of the watchpost edge inference service.
//!
//! Holds the frame, region, scenario and result types exchanged between the
//! capture layer, the scenario pipeline and the transport adapters, together
//! with command parsing and the file-backed service configuration.

pub mod types;
pub mod error;
pub mod command;
pub mod config;

pub use error::{Error, Result};
pub use types::{
    AnalysisResult, CapturedFrame, Detection, DetectionResult, FrameEncoding, FrameResult,
    ModelDescriptor, ModelKind, ModelSummary, Region, ScenarioDescriptor,
};
pub use command::Command;
pub use config::{
    DecoderKind, InMemoryCatalog, JsonScenarioCatalog, ScenarioCatalog, ServiceConfig,
    StreamConfig,
};
