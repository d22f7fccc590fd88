//! Fake platform capabilities for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use screenlink_core::{
    CaptureBackend, CaptureToken, CodecId, EncodedPayload, EncoderConfig, EncoderFactory,
    InputEvent, InputSink, LinkError, Platform, PixelFormat, RawFrame, SessionConfig, Surface,
    VideoEncoder,
};

// ── Capture ──────────────────────────────────────────────────────

/// Capture backend that hands the surface back to the test.
#[derive(Default)]
pub struct FakeCapture {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub fail: AtomicBool,
    /// Milliseconds `acquire` sleeps before answering.
    pub stall_ms: AtomicU64,
    surface: Mutex<Option<Surface>>,
}

impl FakeCapture {
    pub fn surface(&self) -> Option<Surface> {
        self.surface.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn acquire(&self, token: &CaptureToken, surface: Surface) -> Result<(), LinkError> {
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        if self.fail.load(Ordering::SeqCst) || token.is_empty() {
            return Err(LinkError::CaptureUnavailable("authorization revoked".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        *self.surface.lock().unwrap() = Some(surface);
        Ok(())
    }

    async fn release(&self) -> Result<(), LinkError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.surface.lock().unwrap().take();
        Ok(())
    }
}

// ── Encoder ──────────────────────────────────────────────────────

/// Encoder whose payload is just the frame's capture sequence.
pub struct StubEncoder {
    delay: Duration,
    fail_at: Option<u64>,
    payload_bytes: usize,
    encoded: Arc<AtomicU64>,
    keys: Arc<Mutex<Vec<u64>>>,
}

impl VideoEncoder for StubEncoder {
    fn codec(&self) -> CodecId {
        CodecId::Avc
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), LinkError> {
        if config.bitrate == 0 {
            return Err(LinkError::EncoderFault("zero bitrate".into()));
        }
        Ok(())
    }

    fn encode(
        &mut self,
        frame: RawFrame,
        request_key_frame: bool,
    ) -> Result<EncodedPayload, LinkError> {
        let n = self.encoded.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(LinkError::EncoderFault("hardware encoder reset".into()));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if request_key_frame {
            self.keys.lock().unwrap().push(n);
        }
        let mut data = frame.sequence.to_le_bytes().to_vec();
        data.resize(self.payload_bytes.max(data.len()), 0);
        Ok(EncodedPayload {
            data: Bytes::from(data),
            key_frame: request_key_frame,
        })
    }
}

/// Factory for [`StubEncoder`]s sharing one counter.
#[derive(Default, Clone)]
pub struct StubEncoders {
    pub delay: Duration,
    pub fail_at: Option<u64>,
    /// Pad each payload to this size.
    pub payload_bytes: usize,
    pub encoded: Arc<AtomicU64>,
    /// Encode indices that produced key-frames.
    pub keys: Arc<Mutex<Vec<u64>>>,
}

impl EncoderFactory for StubEncoders {
    fn create(&self) -> Result<Box<dyn VideoEncoder>, LinkError> {
        Ok(Box::new(StubEncoder {
            delay: self.delay,
            fail_at: self.fail_at,
            payload_bytes: self.payload_bytes,
            encoded: Arc::clone(&self.encoded),
            keys: Arc::clone(&self.keys),
        }))
    }
}

// ── Input ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<InputEvent>>,
}

impl RecordingSink {
    pub fn snapshot(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl InputSink for RecordingSink {
    fn inject(&self, event: &InputEvent) -> Result<(), LinkError> {
        self.events.lock().unwrap().push(*event);
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────

pub struct Fakes {
    pub capture: Arc<FakeCapture>,
    pub encoders: StubEncoders,
    pub sink: Arc<RecordingSink>,
}

impl Fakes {
    pub fn new(encoders: StubEncoders) -> Self {
        Self {
            capture: Arc::new(FakeCapture::default()),
            encoders,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            capture: self.capture.clone(),
            encoders: Arc::new(self.encoders.clone()),
            input: self.sink.clone(),
        }
    }
}

/// Loopback, ephemeral port, short timeouts.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.transport.bind_address = [127, 0, 0, 1].into();
    config.transport.port = 0;
    config.transport.handshake_timeout_ms = 1000;
    config.drain_timeout_ms = 1000;
    config
}

pub fn token() -> CaptureToken {
    CaptureToken::new(&b"media-projection-grant"[..])
}

/// Packed BGRA frame of a flat colour sharing one buffer.
pub fn frame(width: u32, height: u32, pixels: &Bytes, captured_at: Instant) -> RawFrame {
    RawFrame::packed(width, height, PixelFormat::Bgra8, pixels.clone()).with_timestamp(captured_at)
}

pub fn pixels(width: u32, height: u32) -> Bytes {
    Bytes::from(vec![0x40u8; (width * height * 4) as usize])
}

/// Poll `cond` every few milliseconds until it holds or `wait` elapses.
pub async fn eventually(wait: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
