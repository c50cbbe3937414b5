//! Software capture path: JPEG frames split out of the transcoder's output.

use super::source::{ByteSource, ChunkRead, SourceLauncher};
use super::FrameSource;
use crate::config::EyeConfig;
use crate::error::VisionError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use watchpost_core::CapturedFrame;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const MARKER: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitState {
    Idle,
    Capturing,
}

/// Incremental splitter for a concatenated JPEG byte stream.
///
/// A frame spans from an `FF D8` start marker through the next `FF D9` end
/// marker, both included. Bytes between frames are ignored. State carries over
/// between calls, so the output does not depend on how the stream is chunked.
#[derive(Debug)]
pub struct JpegSplitter {
    state: SplitState,
    buffer: Vec<u8>,
    previous: Option<u8>,
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self {
            state: SplitState::Idle,
            buffer: Vec::new(),
            previous: None,
        }
    }

    /// Feeds `chunk`, pushing completed frames to `out`. Stops early once
    /// `limit` frames have been pushed by this call and returns the number of
    /// bytes consumed.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Vec<u8>>, limit: usize) -> usize {
        let mut emitted = 0;
        if limit == 0 {
            return 0;
        }
        for (i, &byte) in chunk.iter().enumerate() {
            let after_marker = self.previous == Some(MARKER);
            match self.state {
                SplitState::Idle => {
                    if after_marker && byte == SOI {
                        self.buffer.clear();
                        self.buffer.extend_from_slice(&[MARKER, SOI]);
                        self.state = SplitState::Capturing;
                        self.previous = None;
                        continue;
                    }
                }
                SplitState::Capturing => {
                    self.buffer.push(byte);
                    if after_marker && byte == EOI {
                        out.push(std::mem::take(&mut self.buffer));
                        self.state = SplitState::Idle;
                        self.previous = Some(byte);
                        emitted += 1;
                        if emitted >= limit {
                            return i + 1;
                        }
                        continue;
                    }
                }
            }
            self.previous = Some(byte);
        }
        chunk.len()
    }

    /// True while a start marker has been seen without its end marker.
    pub fn is_capturing(&self) -> bool {
        self.state == SplitState::Capturing
    }

    /// Drops an unterminated frame, returning how many bytes were buffered.
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.state = SplitState::Idle;
        self.previous = None;
        dropped
    }
}

/// Captures JPEG keyframes from a transcoder session.
pub struct FrameDemuxer {
    launcher: Arc<dyn SourceLauncher>,
    chunk_size: usize,
    grace: Duration,
}

impl FrameDemuxer {
    pub fn new(launcher: Arc<dyn SourceLauncher>, config: &EyeConfig) -> Self {
        Self {
            launcher,
            chunk_size: config.read_chunk_size.max(1),
            grace: config.timeout_grace(),
        }
    }

    fn drain(
        &self,
        source: &mut dyn ByteSource,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
    ) -> Result<Vec<CapturedFrame>, VisionError> {
        let deadline = Instant::now() + timeout + self.grace;
        let mut splitter = JpegSplitter::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut payloads = Vec::new();
        let mut frames = Vec::with_capacity(max_frames);
        let mut ended = false;
        let mut read_error = None;

        while frames.len() < max_frames {
            let now = Instant::now();
            if now >= deadline {
                debug!("Capture deadline reached with {} of {} frames", frames.len(), max_frames);
                break;
            }
            match source.read_chunk(&mut buf, deadline - now) {
                Ok(ChunkRead::Data(n)) => {
                    splitter.feed(&buf[..n], &mut payloads, max_frames - frames.len());
                    for payload in payloads.drain(..) {
                        let timestamp = frames.len() as f64 / fps;
                        frames.push(CapturedFrame::jpeg(timestamp, payload));
                    }
                }
                Ok(ChunkRead::Pending) => {}
                Ok(ChunkRead::Eof) => {
                    ended = true;
                    break;
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        if splitter.is_capturing() {
            let dropped = splitter.discard_partial();
            debug!("Discarded {} bytes of an unterminated frame", dropped);
        }
        if !ended {
            source.kill();
        }
        let status = source.exit_status().filter(|code| *code != 0);

        if frames.is_empty() {
            let message = match (&read_error, status) {
                (Some(e), _) => format!("stream read failed: {}", e),
                (None, Some(code)) => format!("stream source exited with status {}", code),
                (None, None) => "no frames captured before the deadline".to_string(),
            };
            return Err(VisionError::Capture {
                message,
                exit_status: status,
            });
        }
        if let Some(e) = read_error {
            warn!("Stream read failed after {} frames: {}", frames.len(), e);
        }
        if let Some(code) = status {
            warn!("Stream source exited with status {} after {} frames", code, frames.len());
        }
        Ok(frames)
    }
}

impl FrameSource for FrameDemuxer {
    fn capture(
        &self,
        fps: f64,
        max_frames: usize,
        timeout: Duration,
    ) -> Result<Vec<CapturedFrame>, VisionError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(VisionError::capture(format!("invalid capture rate {}", fps)));
        }
        if max_frames == 0 {
            return Ok(Vec::new());
        }
        let mut source = self.launcher.launch(fps)?;
        let frames = self.drain(source.as_mut(), fps, max_frames, timeout)?;
        debug!("Captured {} JPEG frames at {} fps", frames.len(), fps);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xD8];
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0xFF, 0xD9]);
        frame
    }

    #[test]
    fn test_splitter_ignores_bytes_between_frames() {
        let mut stream = vec![0x00, 0x11];
        stream.extend(jpeg(&[1, 2, 3]));
        stream.extend([0x42, 0xFF]);
        stream.extend(jpeg(&[4]));

        let mut splitter = JpegSplitter::new();
        let mut out = Vec::new();
        splitter.feed(&stream, &mut out, usize::MAX);
        assert_eq!(out, vec![jpeg(&[1, 2, 3]), jpeg(&[4])]);
        assert!(!splitter.is_capturing());
    }

    #[test]
    fn test_splitter_markers_split_across_chunks() {
        let stream = jpeg(&[9, 9]);
        let mut splitter = JpegSplitter::new();
        let mut out = Vec::new();
        for byte in &stream {
            splitter.feed(std::slice::from_ref(byte), &mut out, usize::MAX);
        }
        assert_eq!(out, vec![stream]);
    }

    #[test]
    fn test_splitter_stops_at_limit() {
        let mut stream = jpeg(&[1]);
        stream.extend(jpeg(&[2]));
        let mut splitter = JpegSplitter::new();
        let mut out = Vec::new();
        let consumed = splitter.feed(&stream, &mut out, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_splitter_discards_partial() {
        let mut splitter = JpegSplitter::new();
        let mut out = Vec::new();
        splitter.feed(&[0xFF, 0xD8, 1, 2, 3], &mut out, usize::MAX);
        assert!(out.is_empty());
        assert!(splitter.is_capturing());
        assert_eq!(splitter.discard_partial(), 5);
        assert!(!splitter.is_capturing());
    }
}
