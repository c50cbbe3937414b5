//! watchpost-eye: stream capture and concurrent scenario inference
//!
//! Turns a live video byte stream into timestamped frames, runs every active
//! scenario's detection model over them, and reports detections. Scenarios
//! can be activated and deactivated from a control thread while commands are
//! being processed.

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod persist;
pub mod pipeline;
pub mod registry;

pub use capture::{FrameDemuxer, FrameSource, HardwareFrameDecoder};
pub use codec::DetectionCodec;
pub use config::EyeConfig;
pub use error::VisionError;
pub use monitor::{Monitor, MonitorCycle, MonitorHandle};
pub use persist::{DiskFrameSink, FrameSink};
pub use pipeline::Pipeline;
pub use registry::{ScenarioHandle, ScenarioRegistry, ScenarioRuntime};
