//! Hardware decode path and its fallback to the JPEG demuxer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use watchpost_core::FrameEncoding;
use watchpost_eye::capture::{
    CapturePath, DecodeSession, DecodeSessionFactory, DecodedPicture, DecoderEvent, FrameDemuxer,
    FrameSource, HardwareFrameDecoder, NoHardwareSessions, PictureFormat, ReplayLauncher,
};
use watchpost_eye::{EyeConfig, VisionError};

const SPS: u8 = 0x67;
const IDR: u8 = 0x65;
const SLICE: u8 = 0x41;
const SEI: u8 = 0x06;
/// Slice whose picture still has the pre-change surface layout.
const STALE: u8 = 0x21;

const FORMAT: PictureFormat = PictureFormat {
    width: 4,
    height: 2,
    hor_stride: 8,
    ver_stride: 4,
};

fn annexb(kinds: &[u8]) -> Vec<u8> {
    let mut stream = Vec::new();
    for (i, kind) in kinds.iter().enumerate() {
        stream.extend_from_slice(&[0, 0, 0, 1, *kind, i as u8 + 1, 0xAB]);
    }
    stream
}

fn jpeg_stream(count: u8) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..count {
        stream.extend_from_slice(&[0xFF, 0xD8, i, 0xFF, 0xD9]);
    }
    stream
}

struct FakeSession {
    events: VecDeque<DecoderEvent>,
    pictures: usize,
    fail_after: Option<usize>,
    reconfigured: Arc<AtomicUsize>,
}

impl DecodeSession for FakeSession {
    fn submit(&mut self, unit: &[u8]) -> Result<(), VisionError> {
        let header = unit[4];
        match header {
            SPS => self.events.push_back(DecoderEvent::FormatChanged(FORMAT)),
            IDR | SLICE | SEI => {
                if self.fail_after == Some(self.pictures) {
                    return Err(VisionError::Decoder("device lost".to_string()));
                }
                let fill = self.pictures as u8 + 1;
                self.pictures += 1;
                self.events.push_back(DecoderEvent::Picture(DecodedPicture {
                    format: FORMAT,
                    data: vec![fill; 40],
                    errored: header == SEI,
                    discarded: false,
                }));
            }
            STALE => self.events.push_back(DecoderEvent::Picture(DecodedPicture {
                format: PictureFormat {
                    width: 2,
                    height: 2,
                    hor_stride: 2,
                    ver_stride: 2,
                },
                data: vec![0xEE; 6],
                errored: false,
                discarded: false,
            })),
            _ => {}
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<DecoderEvent>, VisionError> {
        Ok(self.events.pop_front())
    }

    fn reconfigure(&mut self, format: &PictureFormat) -> Result<(), VisionError> {
        assert_eq!(*format, FORMAT);
        self.reconfigured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VisionError> {
        Ok(())
    }
}

struct FakeSessions {
    fail_after: Option<usize>,
    reconfigured: Arc<AtomicUsize>,
}

impl FakeSessions {
    fn new(fail_after: Option<usize>) -> Self {
        Self {
            fail_after,
            reconfigured: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DecodeSessionFactory for FakeSessions {
    fn open(&self) -> Result<Box<dyn DecodeSession>, VisionError> {
        Ok(Box::new(FakeSession {
            events: VecDeque::new(),
            pictures: 0,
            fail_after: self.fail_after,
            reconfigured: self.reconfigured.clone(),
        }))
    }
}

fn decoder(
    kinds: &[u8],
    sessions: Arc<dyn DecodeSessionFactory>,
    jpeg_frames: u8,
) -> HardwareFrameDecoder {
    let config = EyeConfig {
        read_chunk_size: 5,
        timeout_grace_ms: 20,
        ..EyeConfig::default()
    };
    let fallback = FrameDemuxer::new(Arc::new(ReplayLauncher::new(jpeg_stream(jpeg_frames), 64)), &config);
    HardwareFrameDecoder::new(
        Arc::new(ReplayLauncher::new(annexb(kinds), 5)),
        sessions,
        fallback,
        &config,
    )
}

#[test]
fn test_hardware_frames_are_tight_nv12() {
    let sessions = Arc::new(FakeSessions::new(None));
    let decoder = decoder(&[SPS, IDR, SLICE, SLICE, SLICE], sessions.clone(), 0);
    let report = decoder
        .capture_with_report(2.0, 3, Duration::from_secs(2))
        .unwrap();

    assert_eq!(report.path, CapturePath::Hardware);
    assert_eq!(report.frames.len(), 3);
    for (i, frame) in report.frames.iter().enumerate() {
        assert_eq!(frame.encoding(), FrameEncoding::Nv12);
        assert_eq!((frame.width(), frame.height(), frame.stride()), (4, 2, 4));
        assert_eq!(frame.payload().len(), 12);
        assert_eq!(frame.timestamp(), i as f64 / 2.0);
    }
    assert_eq!(sessions.reconfigured.load(Ordering::SeqCst), 1);
    assert_eq!(decoder.fallback_count(), 0);
}

#[test]
fn test_errored_pictures_are_dropped() {
    let decoder = decoder(&[SPS, IDR, SEI, SLICE], Arc::new(FakeSessions::new(None)), 0);
    let frames = decoder.capture(1.0, 5, Duration::from_secs(2)).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload()[0], 1);
    assert_eq!(frames[1].payload()[0], 3);
}

#[test]
fn test_pictures_from_before_format_change_are_dropped() {
    let decoder = decoder(&[SPS, STALE, IDR, SLICE], Arc::new(FakeSessions::new(None)), 0);
    let frames = decoder.capture(1.0, 5, Duration::from_secs(2)).unwrap();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| (f.width(), f.height()) == (4, 2)));
    assert_eq!(frames[0].payload()[0], 1);
    assert_eq!(frames[0].timestamp(), 0.0);
}

#[test]
fn test_missing_hardware_falls_back() {
    let decoder = decoder(&[SPS, IDR], Arc::new(NoHardwareSessions), 3);
    let report = decoder
        .capture_with_report(1.0, 2, Duration::from_secs(2))
        .unwrap();
    assert!(matches!(report.path, CapturePath::Fallback { .. }));
    assert_eq!(report.frames.len(), 2);
    assert!(report.frames.iter().all(|f| f.encoding() == FrameEncoding::Jpeg));
    assert_eq!(decoder.fallback_count(), 1);
}

#[test]
fn test_mid_stream_failure_keeps_decoded_frames() {
    let decoder = decoder(&[SPS, IDR, SLICE, SLICE], Arc::new(FakeSessions::new(Some(1))), 5);
    let report = decoder
        .capture_with_report(1.0, 3, Duration::from_secs(2))
        .unwrap();

    match &report.path {
        CapturePath::Fallback { reason } => assert!(reason.contains("device lost")),
        other => panic!("Expected fallback, got {:?}", other),
    }
    let encodings: Vec<FrameEncoding> = report.frames.iter().map(|f| f.encoding()).collect();
    assert_eq!(encodings, vec![FrameEncoding::Nv12, FrameEncoding::Jpeg, FrameEncoding::Jpeg]);
    let stamps: Vec<f64> = report.frames.iter().map(|f| f.timestamp()).collect();
    assert_eq!(stamps, vec![0.0, 1.0, 2.0]);
}

#[test]
fn test_fallback_without_frames_is_capture_error() {
    let decoder = decoder(&[SPS], Arc::new(NoHardwareSessions), 0);
    let result = decoder.capture(1.0, 1, Duration::from_millis(200));
    assert!(matches!(result, Err(VisionError::Capture { .. })));
    assert_eq!(decoder.fallback_count(), 1);
}
