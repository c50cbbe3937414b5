//! Frame capture from the live video stream

pub mod demux;
pub mod hardware;
pub mod nal;
pub mod source;

pub use demux::{FrameDemuxer, JpegSplitter};
pub use hardware::{
    CapturePath, CaptureReport, DecodeSession, DecodeSessionFactory, DecodedPicture, DecoderEvent,
    HardwareFrameDecoder, NoHardwareSessions, PictureFormat,
};
pub use nal::NalScanner;
pub use source::{
    ByteSource, ChunkRead, ChunkedSource, FfmpegLauncher, ProcessSource, ReplayLauncher,
    SourceLauncher, StreamMode,
};

use crate::error::VisionError;
use std::time::Duration;
use watchpost_core::CapturedFrame;

/// Anything that can pull a bounded batch of frames from the stream.
pub trait FrameSource: Send + Sync {
    /// Captures up to `max_frames` frames sampled at `fps`, giving up once
    /// `timeout` has elapsed. Frame `i` carries timestamp `i / fps`.
    fn capture(
        &self,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
    ) -> Result<Vec<CapturedFrame>, VisionError>;
}
