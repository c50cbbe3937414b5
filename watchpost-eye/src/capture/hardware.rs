//! Hardware decode path with transparent fallback to the JPEG demuxer.
//!
//! The compressed stream is split into NAL units and pushed through a vendor
//! decode session. Decoded NV12 surfaces carry padded strides and are repacked
//! to tight planes before leaving this module.

use super::demux::FrameDemuxer;
use super::nal::NalScanner;
use super::source::{ChunkRead, SourceLauncher};
use super::FrameSource;
use crate::config::EyeConfig;
use crate::error::VisionError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use watchpost_core::CapturedFrame;

/// Geometry of decoder output surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureFormat {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including padding
    pub hor_stride: u32,
    /// Rows allocated for the luma plane, including padding
    pub ver_stride: u32,
}

/// One decoded surface as handed out by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPicture {
    pub format: PictureFormat,
    pub data: Vec<u8>,
    pub errored: bool,
    pub discarded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Picture(DecodedPicture),
    /// The stream changed resolution; output buffers must be rebuilt.
    FormatChanged(PictureFormat),
}

/// A vendor decode session.
pub trait DecodeSession: Send {
    fn submit(&mut self, unit: &[u8]) -> Result<(), VisionError>;

    /// Next pending event, or `None` when the session has nothing ready.
    fn poll(&mut self) -> Result<Option<DecoderEvent>, VisionError>;

    /// Reallocates output buffers after a format change.
    fn reconfigure(&mut self, format: &PictureFormat) -> Result<(), VisionError>;

    /// Signals end of stream so buffered pictures are released.
    fn finish(&mut self) -> Result<(), VisionError>;
}

pub trait DecodeSessionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn DecodeSession>, VisionError>;
}

/// Session factory for hosts without a hardware decoder. Every open fails,
/// which routes all captures through the fallback.
#[derive(Debug, Default)]
pub struct NoHardwareSessions;

impl DecodeSessionFactory for NoHardwareSessions {
    fn open(&self) -> Result<Box<dyn DecodeSession>, VisionError> {
        Err(VisionError::Decoder(
            "no hardware decoder available on this host".to_string(),
        ))
    }
}

/// Copies the visible area of a padded NV12 surface into tight planes.
pub fn repack_nv12(picture: &DecodedPicture) -> Result<Vec<u8>, VisionError> {
    let PictureFormat {
        width,
        height,
        hor_stride,
        ver_stride,
    } = picture.format;
    if width == 0 || height == 0 {
        return Err(VisionError::Decoder("decoded picture has no area".to_string()));
    }
    if hor_stride < width || ver_stride < height {
        return Err(VisionError::Decoder(format!(
            "stride {}x{} smaller than picture {}x{}",
            hor_stride, ver_stride, width, height
        )));
    }
    let (w, h, hs, vs) = (width as usize, height as usize, hor_stride as usize, ver_stride as usize);
    let chroma_rows = (h + 1) / 2;
    let required = hs * vs + hs * (chroma_rows - 1) + w;
    if picture.data.len() < required {
        return Err(VisionError::Decoder(format!(
            "surface holds {} bytes, {} needed",
            picture.data.len(),
            required
        )));
    }

    let mut packed = Vec::with_capacity(w * h + w * chroma_rows);
    for row in 0..h {
        let start = row * hs;
        packed.extend_from_slice(&picture.data[start..start + w]);
    }
    let chroma = hs * vs;
    for row in 0..chroma_rows {
        let start = chroma + row * hs;
        packed.extend_from_slice(&picture.data[start..start + w]);
    }
    Ok(packed)
}

/// Which path produced a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePath {
    Hardware,
    /// The hardware path failed and the demuxer finished the call.
    Fallback { reason: String },
}

#[derive(Debug)]
pub struct CaptureReport {
    pub frames: Vec<CapturedFrame>,
    pub path: CapturePath,
}

/// Captures NV12 frames through a hardware decode session.
pub struct HardwareFrameDecoder {
    launcher: Arc<dyn SourceLauncher>,
    sessions: Arc<dyn DecodeSessionFactory>,
    fallback: FrameDemuxer,
    chunk_size: usize,
    grace: Duration,
    fallbacks: AtomicU64,
}

impl HardwareFrameDecoder {
    /// `launcher` must produce an Annex-B stream; `fallback` is used whenever
    /// the session cannot be opened or fails mid-stream.
    pub fn new(
        launcher: Arc<dyn SourceLauncher>,
        sessions: Arc<dyn DecodeSessionFactory>,
        fallback: FrameDemuxer,
        config: &EyeConfig,
    ) -> Self {
        Self {
            launcher,
            sessions,
            fallback,
            chunk_size: config.read_chunk_size.max(1),
            grace: config.timeout_grace(),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of captures that had to fall back to the demuxer.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn capture_with_report(
        &self,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
    ) -> Result<CaptureReport, VisionError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(VisionError::capture(format!("invalid capture rate {}", fps)));
        }
        if max_frames == 0 {
            return Ok(CaptureReport {
                frames: Vec::new(),
                path: CapturePath::Hardware,
            });
        }

        let started = Instant::now();
        let mut frames = Vec::with_capacity(max_frames);
        let err = match self.decode(fps, max_frames, timeout, &mut frames) {
            Ok(status) => {
                if frames.is_empty() {
                    return Err(VisionError::Capture {
                        message: "hardware decoder produced no frames".to_string(),
                        exit_status: status,
                    });
                }
                if let Some(code) = status {
                    warn!("Stream source exited with status {} after {} frames", code, frames.len());
                }
                return Ok(CaptureReport {
                    frames,
                    path: CapturePath::Hardware,
                });
            }
            Err(err) => err,
        };

        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Hardware decode failed after {} frames, falling back to software demuxer: {}",
            frames.len(),
            err
        );
        let remaining = max_frames - frames.len();
        let budget = timeout.saturating_sub(started.elapsed());
        match self.fallback.capture(fps, remaining, budget) {
            Ok(more) => {
                let offset = frames.len();
                frames.extend(
                    more.into_iter()
                        .enumerate()
                        .map(|(i, frame)| frame.restamped((offset + i) as f64 / fps)),
                );
            }
            Err(fallback_err) if !frames.is_empty() => {
                warn!("Fallback capture failed, keeping {} decoded frames: {}", frames.len(), fallback_err);
            }
            Err(fallback_err) => return Err(fallback_err),
        }
        Ok(CaptureReport {
            frames,
            path: CapturePath::Fallback {
                reason: err.to_string(),
            },
        })
    }

    /// Runs the hardware path. Session failures come back as `Err` with the
    /// frames decoded so far left in `frames`; otherwise returns the source's
    /// failing exit status, if any.
    fn decode(
        &self,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
        frames: &mut Vec<CapturedFrame>,
    ) -> Result<Option<i32>, VisionError> {
        let mut session = self.sessions.open()?;
        let mut source = self.launcher.launch(fps)?;
        let deadline = Instant::now() + timeout + self.grace;
        let mut scanner = NalScanner::new();
        let mut units = Vec::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut format = None;
        let mut ended = false;

        while frames.len() < max_frames {
            let now = Instant::now();
            if now >= deadline {
                debug!("Hardware capture deadline reached with {} of {} frames", frames.len(), max_frames);
                break;
            }
            match source.read_chunk(&mut buf, deadline - now) {
                Ok(ChunkRead::Data(n)) => scanner.feed(&buf[..n], &mut units),
                Ok(ChunkRead::Pending) => {}
                Ok(ChunkRead::Eof) => {
                    scanner.flush(&mut units);
                    ended = true;
                }
                Err(e) => {
                    warn!("Stream read failed during hardware capture: {}", e);
                    scanner.flush(&mut units);
                    ended = true;
                }
            }
            for unit in units.drain(..) {
                session.submit(&unit)?;
                pull_pictures(session.as_mut(), &mut format, frames, fps, max_frames)?;
                if frames.len() >= max_frames {
                    break;
                }
            }
            if ended {
                if frames.len() < max_frames {
                    session.finish()?;
                    pull_pictures(session.as_mut(), &mut format, frames, fps, max_frames)?;
                }
                break;
            }
        }

        if !ended {
            source.kill();
        }
        Ok(source.exit_status().filter(|code| *code != 0))
    }
}

fn pull_pictures(
    session: &mut dyn DecodeSession,
    format: &mut Option<PictureFormat>,
    frames: &mut Vec<CapturedFrame>,
    fps: f64,
    max_frames: usize,
) -> Result<(), VisionError> {
    while frames.len() < max_frames {
        let Some(event) = session.poll()? else {
            break;
        };
        match event {
            DecoderEvent::FormatChanged(next) => {
                session.reconfigure(&next)?;
                info!(
                    "Decoder output reconfigured to {}x{} (stride {}x{})",
                    next.width, next.height, next.hor_stride, next.ver_stride
                );
                *format = Some(next);
            }
            DecoderEvent::Picture(picture) => {
                if picture.errored || picture.discarded {
                    debug!("Skipping errored or discarded picture");
                    continue;
                }
                // Buffers queued before a format change still carry the old layout.
                if (*format).is_some_and(|current| current != picture.format) {
                    debug!(
                        "Skipping {}x{} picture from before the format change",
                        picture.format.width, picture.format.height
                    );
                    continue;
                }
                let packed = repack_nv12(&picture)?;
                let timestamp = frames.len() as f64 / fps;
                frames.push(CapturedFrame::nv12(
                    timestamp,
                    packed,
                    picture.format.width,
                    picture.format.height,
                ));
            }
        }
    }
    Ok(())
}

impl FrameSource for HardwareFrameDecoder {
    fn capture(
        &self,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
    ) -> Result<Vec<CapturedFrame>, VisionError> {
        self.capture_with_report(fps, max_frames, timeout)
            .map(|report| report.frames)
    }
}
