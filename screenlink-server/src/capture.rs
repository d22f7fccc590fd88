//! Synthetic capture backend: renders a test pattern at the session
//! frame rate and submits it to the surface handed over by `acquire`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use screenlink_core::{
    CaptureBackend, CaptureToken, LinkError, PixelFormat, RawFrame, SubmitOutcome, Surface,
};

const BAR_WIDTH: u32 = 32;
const BAR_STEP: u32 = 8;

/// What the synthetic display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// A fixed gradient; only the first frame carries content.
    Static,
    /// The gradient with a bar sweeping left to right.
    MovingBar,
}

// ── Renderer ─────────────────────────────────────────────────────

/// Produces packed BGRA frames for one geometry.
pub struct Renderer {
    pattern: Pattern,
    width: u32,
    height: u32,
    background: Bytes,
}

impl Renderer {
    pub fn new(pattern: Pattern, width: u32, height: u32) -> Self {
        let mut buf = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let b = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                buf.extend_from_slice(&[b, g, 0x60, 0xFF]);
            }
        }
        Self {
            pattern,
            width,
            height,
            background: Bytes::from(buf),
        }
    }

    pub fn render(&self, tick: u64) -> RawFrame {
        let data = match self.pattern {
            Pattern::Static => self.background.clone(),
            Pattern::MovingBar => {
                let mut buf = self.background.to_vec();
                let stride = self.width as usize * 4;
                let start = ((tick * BAR_STEP as u64) % self.width.max(1) as u64) as u32;
                let end = (start + BAR_WIDTH).min(self.width);
                for y in 0..self.height as usize {
                    let row = &mut buf[y * stride..(y + 1) * stride];
                    for x in start as usize..end as usize {
                        row[x * 4..x * 4 + 4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
                    }
                }
                Bytes::from(buf)
            }
        };
        RawFrame::packed(self.width, self.height, PixelFormat::Bgra8, data)
    }
}

// ── SyntheticCapture ─────────────────────────────────────────────

struct Producer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`CaptureBackend`] backed by a [`Renderer`] task.
pub struct SyntheticCapture {
    pattern: Pattern,
    frame_rate: u32,
    producer: Mutex<Option<Producer>>,
}

impl SyntheticCapture {
    pub fn new(pattern: Pattern, frame_rate: u32) -> Self {
        Self {
            pattern,
            frame_rate: frame_rate.max(1),
            producer: Mutex::new(None),
        }
    }

    fn take_producer(&self) -> Option<Producer> {
        self.producer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn acquire(&self, token: &CaptureToken, surface: Surface) -> Result<(), LinkError> {
        if token.is_empty() {
            return Err(LinkError::CaptureUnavailable("empty capture token".into()));
        }
        if let Some(stale) = self.take_producer() {
            stale.cancel.cancel();
        }

        let renderer = Renderer::new(self.pattern, surface.width(), surface.height());
        let period = Duration::from_secs(1) / self.frame_rate;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(produce(renderer, surface, period, cancel.clone()));
        *self
            .producer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Producer { cancel, task });

        info!(pattern = ?self.pattern, fps = self.frame_rate, "synthetic capture started");
        Ok(())
    }

    async fn release(&self) -> Result<(), LinkError> {
        let Some(producer) = self.take_producer() else {
            return Ok(());
        };
        producer.cancel.cancel();
        producer
            .task
            .await
            .map_err(|e| LinkError::Other(format!("capture task failed: {e}")))?;
        info!("synthetic capture stopped");
        Ok(())
    }
}

async fn produce(renderer: Renderer, surface: Surface, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match surface.submit(renderer.render(tick)) {
            SubmitOutcome::Queued => {}
            SubmitOutcome::QueuedDroppedOldest => debug!(tick, "encoder behind, frame dropped"),
            SubmitOutcome::Rejected => {
                warn!("surface rejected a synthetic frame");
                break;
            }
            SubmitOutcome::Closed => break,
        }
        tick += 1;
    }
    debug!(frames = tick, "capture producer exited");
}

// ── Tests ────────────────────────────────────────────────────────
