//! Drives one [`VideoEncoder`] on a dedicated blocking thread.
//!
//! ```text
//!  frame queue ──► encoder thread ──► unit queue (drop-oldest-delta)
//!                      ▲
//!        key-frame requests (cadence, eviction, viewer)
//! ```
//!
//! The thread owns the encoder. Sequence numbers are assigned here and
//! are gap-free; presentation timestamps never go backwards. Any encoder
//! error ends the thread and is reported as [`PipelineEvent::EncoderFault`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::encode::{BandwidthEstimator, EncoderConfig, EncoderFactory, VideoEncoder};
use crate::error::LinkError;
use crate::queue::{BoundedQueue, OverflowPolicy, PushOutcome};
use crate::types::{CodecId, EncodedUnit, RawFrame, UnitFlags};

const RATE_CONTROL_PERIOD: Duration = Duration::from_secs(1);

// ── Events & requests ────────────────────────────────────────────

/// Asynchronous notifications from the encoder thread.
#[derive(Debug)]
pub enum PipelineEvent {
    EncoderFault(LinkError),
}

/// Shared flag asking the encoder for a key-frame on its next frame.
#[derive(Debug, Clone, Default)]
pub struct KeyFrameRequest(Arc<AtomicBool>);

impl KeyFrameRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

// ── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    frames_in: AtomicU64,
    units_out: AtomicU64,
    key_frames: AtomicU64,
    forced_key_frames: AtomicU64,
    units_evicted: AtomicU64,
    bytes_out: AtomicU64,
}

/// Snapshot of encoder-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_in: u64,
    pub units_out: u64,
    pub key_frames: u64,
    pub forced_key_frames: u64,
    pub units_evicted: u64,
    pub bytes_out: u64,
}

// ── EncoderPipeline ──────────────────────────────────────────────

/// Handle to the running encoder thread.
pub struct EncoderPipeline {
    units: Arc<BoundedQueue<EncodedUnit>>,
    key_request: KeyFrameRequest,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    codec: CodecId,
}

impl EncoderPipeline {
    /// Create and configure an encoder, then start consuming `frames`.
    ///
    /// Creation and configuration errors are returned synchronously as
    /// [`LinkError::EncoderFault`].
    pub fn start(
        factory: &dyn EncoderFactory,
        config: EncoderConfig,
        frames: Arc<BoundedQueue<RawFrame>>,
        unit_capacity: usize,
        events: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, LinkError> {
        let mut encoder = factory.create().map_err(as_encoder_fault)?;
        if let Err(e) = encoder.configure(&config) {
            encoder.release();
            return Err(as_encoder_fault(e));
        }
        let codec = encoder.codec();

        let units = Arc::new(BoundedQueue::new(
            unit_capacity,
            OverflowPolicy::DropOldestDelta,
        ));
        let key_request = KeyFrameRequest::default();
        let counters = Arc::new(Counters::default());

        let worker = EncoderWorker {
            encoder,
            period: config.key_frame_period(),
            epoch: config.epoch,
            frames,
            units: Arc::clone(&units),
            key_request: key_request.clone(),
            counters: Arc::clone(&counters),
            events,
            cancel: cancel.clone(),
            runtime: Handle::current(),
        };
        let worker = tokio::task::spawn_blocking(move || worker.run());

        info!(
            ?codec,
            width = config.width,
            height = config.height,
            bitrate = config.bitrate,
            "encoder pipeline started"
        );
        Ok(Self {
            units,
            key_request,
            counters,
            cancel,
            worker: Some(worker),
            codec,
        })
    }

    pub fn units(&self) -> Arc<BoundedQueue<EncodedUnit>> {
        Arc::clone(&self.units)
    }

    pub fn key_frame_request(&self) -> KeyFrameRequest {
        self.key_request.clone()
    }

    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_in: c.frames_in.load(Ordering::Relaxed),
            units_out: c.units_out.load(Ordering::Relaxed),
            key_frames: c.key_frames.load(Ordering::Relaxed),
            forced_key_frames: c.forced_key_frames.load(Ordering::Relaxed),
            units_evicted: c.units_evicted.load(Ordering::Relaxed),
            bytes_out: c.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Stop the encoder thread and close the unit queue.
    ///
    /// Waits at most `timeout` for the thread; a thread still inside
    /// `encode` is left to finish on its own. Idempotent.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.cancel.cancel();
        let result = match self.worker.take() {
            Some(worker) => match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LinkError::EncoderFault(format!("encoder thread panicked: {e}"))),
                Err(_) => {
                    warn!(?timeout, "encoder thread did not stop in time");
                    Err(LinkError::Timeout(timeout))
                }
            },
            None => Ok(()),
        };
        self.units.close();
        result
    }
}

fn as_encoder_fault(e: LinkError) -> LinkError {
    match e {
        LinkError::EncoderFault(_) => e,
        other => LinkError::EncoderFault(other.to_string()),
    }
}

// ── EncoderWorker ────────────────────────────────────────────────

struct EncoderWorker {
    encoder: Box<dyn VideoEncoder>,
    period: u64,
    epoch: Instant,
    frames: Arc<BoundedQueue<RawFrame>>,
    units: Arc<BoundedQueue<EncodedUnit>>,
    key_request: KeyFrameRequest,
    counters: Arc<Counters>,
    events: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl EncoderWorker {
    fn run(mut self) {
        if let Err(e) = self.encode_loop() {
            error!("encoder pipeline failed: {e}");
            if self.events.try_send(PipelineEvent::EncoderFault(e)).is_err() {
                warn!("fault channel unavailable, encoder fault not delivered");
            }
        }
        self.encoder.release();
        debug!("encoder thread exited");
    }

    fn encode_loop(&mut self) -> Result<(), LinkError> {
        let mut sequence = 0u64;
        let mut last_pts = 0u64;
        let mut since_key = 0u64;
        let mut resync = false;
        let mut bandwidth = BandwidthEstimator::new();
        let mut last_adjust = Instant::now();

        loop {
            let next = self.runtime.block_on(async {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    frame = self.frames.pop() => frame,
                }
            });
            let Some(frame) = next else {
                return Ok(());
            };
            self.counters.frames_in.fetch_add(1, Ordering::Relaxed);

            let viewer_wants_key = self.key_request.take();
            let force = sequence == 0 || since_key >= self.period || resync || viewer_wants_key;
            let captured_at = frame.captured_at;

            let payload = self.encoder.encode(frame, force).map_err(as_encoder_fault)?;
            if force && !payload.key_frame {
                return Err(LinkError::EncoderFault(
                    "encoder ignored a key-frame request".into(),
                ));
            }

            let pts = (captured_at.saturating_duration_since(self.epoch).as_micros() as u64)
                .max(last_pts);
            last_pts = pts;

            let len = payload.data.len() as u64;
            let unit = EncodedUnit {
                sequence,
                pts_us: pts,
                flags: if payload.key_frame {
                    UnitFlags::KEY_FRAME
                } else {
                    UnitFlags::empty()
                },
                payload: payload.data,
            };
            sequence += 1;
            resync = false;

            if unit.is_key_frame() {
                since_key = 1;
                self.counters.key_frames.fetch_add(1, Ordering::Relaxed);
                if force {
                    self.counters.forced_key_frames.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                since_key += 1;
            }
            trace!(seq = unit.sequence, pts, len, key = unit.is_key_frame(), "encoded");

            match self.units.push(unit) {
                PushOutcome::Queued => {}
                PushOutcome::Evicted(old) => {
                    debug!(dropped = old.sequence, "unit queue full, forcing resync");
                    self.counters.units_evicted.fetch_add(1, Ordering::Relaxed);
                    resync = true;
                }
                PushOutcome::Closed(_) => return Ok(()),
            }
            self.counters.units_out.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes_out.fetch_add(len, Ordering::Relaxed);

            bandwidth.record(len);
            if last_adjust.elapsed() >= RATE_CONTROL_PERIOD {
                self.encoder.adjust_to_throughput(bandwidth.bits_per_second());
                last_adjust = Instant::now();
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
