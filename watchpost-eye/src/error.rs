//! Error types for watchpost-eye

use thiserror::Error;
use watchpost_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum VisionError {
    /// The stream source failed or produced nothing. `exit_status` is the
    /// source process status when it exited on its own with a failure.
    #[error("Capture error: {message}")]
    Capture {
        message: String,
        exit_status: Option<i32>,
    },

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Region error: {0}")]
    Region(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Core error: {0}")]
    Core(CoreError),
}

impl VisionError {
    pub fn capture(message: impl Into<String>) -> Self {
        VisionError::Capture {
            message: message.into(),
            exit_status: None,
        }
    }
}

impl From<CoreError> for VisionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownScenario(id) => VisionError::UnknownScenario(id),
            CoreError::InvalidCommand(msg) => VisionError::InvalidCommand(msg),
            CoreError::Configuration(msg) => VisionError::Config(msg),
            other => VisionError::Core(other),
        }
    }
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::UnknownScenario(id) => CoreError::UnknownScenario(id),
            VisionError::InvalidCommand(msg) => CoreError::InvalidCommand(msg),
            VisionError::Core(inner) => inner,
            other => CoreError::Configuration(format!("Vision error: {}", other)),
        }
    }
}
