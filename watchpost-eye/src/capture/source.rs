//! Byte sources feeding the frame demuxers.
//!
//! A source is a single live stream session. The production source spawns the
//! external transcoder and pumps its stdout through a reader thread so reads
//! can be bounded by a deadline.

use crate::error::VisionError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use watchpost_core::StreamConfig;

/// Outcome of one bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRead {
    /// `n` bytes were written to the front of the buffer.
    Data(usize),
    /// Nothing arrived within the wait.
    Pending,
    /// The source closed its output.
    Eof,
}

pub trait ByteSource: Send {
    /// Reads the next chunk into `buf`, blocking for at most `wait`.
    fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ChunkRead>;

    /// Stops the source early. Safe to call more than once.
    fn kill(&mut self);

    /// Exit status of the source, waiting for it if needed. `None` when the
    /// source was killed or reports no status.
    fn exit_status(&mut self) -> Option<i32>;
}

/// Starts one stream session per capture call.
pub trait SourceLauncher: Send + Sync {
    fn launch(&self, fps: f64) -> Result<Box<dyn ByteSource>, VisionError>;
}

/// What the transcoder writes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Keyframes only, re-encoded as concatenated JPEG images at the requested rate
    Mjpeg,
    /// Untouched H.264 elementary stream in Annex-B framing
    AnnexB,
}

/// Launches `ffmpeg` against the configured RTSP stream.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: String,
    url: String,
    transport: String,
    mode: StreamMode,
}

impl FfmpegLauncher {
    pub fn new(stream: &StreamConfig, mode: StreamMode) -> Self {
        Self {
            program: stream.ffmpeg_path.clone(),
            url: stream.url.clone(),
            transport: stream.transport.clone(),
            mode,
        }
    }

    /// Command-line arguments for one session at `fps`.
    pub fn args(&self, fps: f64) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-nostdin".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-rtsp_transport".into(),
            self.transport.clone(),
            "-i".into(),
            self.url.clone(),
            "-an".into(),
        ];
        match self.mode {
            StreamMode::Mjpeg => args.extend([
                "-vf".into(),
                format!("select='eq(pict_type\\,I)',fps={}", fps),
                "-vcodec".into(),
                "mjpeg".into(),
                "-q:v".into(),
                "2".into(),
                "-f".into(),
                "image2pipe".into(),
                "-".into(),
            ]),
            StreamMode::AnnexB => args.extend([
                "-c:v".into(),
                "copy".into(),
                "-bsf:v".into(),
                "h264_mp4toannexb".into(),
                "-f".into(),
                "h264".into(),
                "-".into(),
            ]),
        }
        args
    }
}

impl SourceLauncher for FfmpegLauncher {
    fn launch(&self, fps: f64) -> Result<Box<dyn ByteSource>, VisionError> {
        if self.url.is_empty() {
            return Err(VisionError::capture("stream url is not configured"));
        }
        let mut command = Command::new(&self.program);
        command.args(self.args(fps));
        info!("Starting {} for {} at {} fps ({:?})", self.program, self.url, fps, self.mode);
        let source = ProcessSource::spawn(command)?;
        Ok(Box::new(source))
    }
}

const PIPE_BUFFER: usize = 4096;
const PIPE_DEPTH: usize = 64;

/// A child process whose stdout is the stream.
pub struct ProcessSource {
    child: Child,
    chunks: Option<Receiver<io::Result<Vec<u8>>>>,
    reader: Option<JoinHandle<()>>,
    pending: Vec<u8>,
    offset: usize,
    killed: bool,
    status: Option<Option<i32>>,
}

impl ProcessSource {
    pub fn spawn(mut command: Command) -> Result<Self, VisionError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = command
            .spawn()
            .map_err(|e| VisionError::capture(format!("failed to start stream source: {}", e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisionError::capture("stream source has no stdout"))?;

        let (tx, rx) = bounded(PIPE_DEPTH);
        let reader = thread::Builder::new()
            .name("watchpost-source".to_string())
            .spawn(move || {
                let mut buf = [0u8; PIPE_BUFFER];
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            child,
            chunks: Some(rx),
            reader: Some(reader),
            pending: Vec::new(),
            offset: 0,
            killed: false,
            status: None,
        })
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        if self.offset == self.pending.len() {
            self.pending.clear();
            self.offset = 0;
        }
        n
    }
}

impl ByteSource for ProcessSource {
    fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ChunkRead> {
        if self.offset < self.pending.len() {
            return Ok(ChunkRead::Data(self.drain_pending(buf)));
        }
        let Some(chunks) = self.chunks.as_ref() else {
            return Ok(ChunkRead::Eof);
        };
        match chunks.recv_timeout(wait) {
            Ok(Ok(data)) => {
                self.pending = data;
                self.offset = 0;
                Ok(ChunkRead::Data(self.drain_pending(buf)))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(ChunkRead::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(ChunkRead::Eof),
        }
    }

    fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        // Dropping the receiver unblocks a reader stuck on a full channel.
        self.chunks = None;
        if let Err(e) = self.child.kill() {
            debug!("Stream source already gone: {}", e);
        }
    }

    fn exit_status(&mut self) -> Option<i32> {
        if let Some(status) = self.status {
            return status;
        }
        let status = match self.child.wait() {
            Ok(status) if self.killed => {
                debug!("Stream source stopped: {}", status);
                None
            }
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to reap stream source: {}", e);
                None
            }
        };
        self.status = Some(status);
        status
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.kill();
            let _ = self.child.wait();
        }
        self.chunks = None;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// In-memory stream that hands out fixed-size chunks.
///
/// Used for replaying recorded streams and for tests. When `stall` is set the
/// source never reports end of stream and behaves like a live feed that went
/// quiet.
#[derive(Debug, Clone)]
pub struct ChunkedSource {
    data: Arc<Vec<u8>>,
    position: usize,
    chunk_size: usize,
    exit_status: Option<i32>,
    stall: bool,
    killed: bool,
}

impl ChunkedSource {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self::shared(Arc::new(data), chunk_size)
    }

    fn shared(data: Arc<Vec<u8>>, chunk_size: usize) -> Self {
        Self {
            data,
            position: 0,
            chunk_size: chunk_size.max(1),
            exit_status: Some(0),
            stall: false,
            killed: false,
        }
    }

    pub fn with_exit_status(mut self, status: Option<i32>) -> Self {
        self.exit_status = status;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }
}

impl ByteSource for ChunkedSource {
    fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ChunkRead> {
        if self.killed {
            return Ok(ChunkRead::Eof);
        }
        if self.position >= self.data.len() {
            if self.stall {
                thread::sleep(wait.min(Duration::from_millis(5)));
                return Ok(ChunkRead::Pending);
            }
            return Ok(ChunkRead::Eof);
        }
        let end = (self.position + self.chunk_size.min(buf.len())).min(self.data.len());
        let n = end - self.position;
        buf[..n].copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(ChunkRead::Data(n))
    }

    fn kill(&mut self) {
        self.killed = true;
    }

    fn exit_status(&mut self) -> Option<i32> {
        if self.killed {
            None
        } else {
            self.exit_status
        }
    }
}

/// Launches [`ChunkedSource`] sessions over a fixed recording.
#[derive(Debug)]
pub struct ReplayLauncher {
    data: Arc<Vec<u8>>,
    chunk_size: usize,
    exit_status: Option<i32>,
    stall: bool,
    launches: AtomicUsize,
    last_fps: Mutex<Option<f64>>,
}

impl ReplayLauncher {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data: Arc::new(data),
            chunk_size,
            exit_status: Some(0),
            stall: false,
            launches: AtomicUsize::new(0),
            last_fps: Mutex::new(None),
        }
    }

    pub fn from_file(path: &std::path::Path, chunk_size: usize) -> Result<Self, VisionError> {
        Ok(Self::new(std::fs::read(path)?, chunk_size))
    }

    pub fn with_exit_status(mut self, status: Option<i32>) -> Self {
        self.exit_status = status;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_fps(&self) -> Option<f64> {
        *self.last_fps.lock()
    }
}

impl SourceLauncher for ReplayLauncher {
    fn launch(&self, fps: f64) -> Result<Box<dyn ByteSource>, VisionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_fps.lock() = Some(fps);
        let mut source =
            ChunkedSource::shared(self.data.clone(), self.chunk_size).with_exit_status(self.exit_status);
        if self.stall {
            source = source.stalling();
        }
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_args_select_keyframes() {
        let stream = StreamConfig {
            url: "rtsp://cam/1".to_string(),
            ..StreamConfig::default()
        };
        let args = FfmpegLauncher::new(&stream, StreamMode::Mjpeg).args(2.0);
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport udp -i rtsp://cam/1 -an"));
        assert!(joined.contains("select='eq(pict_type\\,I)',fps=2"));
        assert!(joined.ends_with("-f image2pipe -"));
    }

    #[test]
    fn test_annexb_args_copy_stream() {
        let stream = StreamConfig {
            url: "rtsp://cam/1".to_string(),
            transport: "tcp".to_string(),
            ..StreamConfig::default()
        };
        let args = FfmpegLauncher::new(&stream, StreamMode::AnnexB).args(1.0);
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.ends_with("-f h264 -"));
    }

    #[test]
    fn test_launch_without_url_fails() {
        let launcher = FfmpegLauncher::new(&StreamConfig::default(), StreamMode::Mjpeg);
        assert!(matches!(launcher.launch(1.0), Err(VisionError::Capture { .. })));
    }

    #[test]
    fn test_chunked_source_respects_chunk_size() {
        let mut source = ChunkedSource::new((0u8..10).collect(), 4);
        let mut buf = [0u8; 16];
        let wait = Duration::from_millis(1);
        assert_eq!(source.read_chunk(&mut buf, wait).unwrap(), ChunkRead::Data(4));
        assert_eq!(&buf[..4], &[0, 1, 2, 3]);
        assert_eq!(source.read_chunk(&mut buf, wait).unwrap(), ChunkRead::Data(4));
        assert_eq!(source.read_chunk(&mut buf, wait).unwrap(), ChunkRead::Data(2));
        assert_eq!(source.read_chunk(&mut buf, wait).unwrap(), ChunkRead::Eof);
        assert_eq!(source.exit_status(), Some(0));
    }

    #[test]
    fn test_killed_source_reports_no_status() {
        let mut source = ChunkedSource::new(vec![1, 2, 3], 1).with_exit_status(Some(1));
        source.kill();
        assert_eq!(source.exit_status(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_source_reads_stdout() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf 'abc'; exit 3"]);
        let mut source = ProcessSource::spawn(command).unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            match source.read_chunk(&mut buf, Duration::from_secs(5)).unwrap() {
                ChunkRead::Data(n) => collected.extend_from_slice(&buf[..n]),
                ChunkRead::Pending => continue,
                ChunkRead::Eof => break,
            }
        }
        assert_eq!(collected, b"abc");
        assert_eq!(source.exit_status(), Some(3));
    }
}
