//! Frame Source: the capture side of the pipeline.
//!
//! The platform layer sits behind [`CaptureBackend`]. Once a backend has
//! acquired capture, frames arrive through the [`Surface`] handle, whose
//! [`submit`](Surface::submit) is the per-frame capture callback. It never
//! blocks; a full queue drops its oldest frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::queue::{BoundedQueue, OverflowPolicy, PushOutcome, QueueStats};
use crate::types::{CaptureToken, RawFrame, SessionParams};

// ── CaptureBackend ───────────────────────────────────────────────

/// Platform capture capability.
///
/// `acquire` binds the platform's capture output to `surface` (for
/// example by handing it to a virtual display or a producer thread).
/// `release` must stop all further submissions. It is also called after
/// an `acquire` that was abandoned part way.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn acquire(&self, token: &CaptureToken, surface: Surface) -> Result<(), LinkError>;

    async fn release(&self) -> Result<(), LinkError>;
}

// ── Surface ──────────────────────────────────────────────────────

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queued; the oldest pending frame was dropped.
    QueuedDroppedOldest,
    /// Frame geometry does not match the session.
    Rejected,
    /// The surface has been unregistered.
    Closed,
}

struct SurfaceShared {
    width: u32,
    height: u32,
    queue: Arc<BoundedQueue<RawFrame>>,
    // Held across the push so queue order matches sequence order.
    next_sequence: Mutex<u64>,
    closed: AtomicBool,
    submitted: AtomicU64,
    rejected: AtomicU64,
}

/// Drawable handle returned by `start`; cheap to clone.
#[derive(Clone)]
pub struct Surface {
    shared: Arc<SurfaceShared>,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Surface {
    fn new(width: u32, height: u32, queue: Arc<BoundedQueue<RawFrame>>) -> Self {
        Self {
            shared: Arc::new(SurfaceShared {
                width,
                height,
                queue,
                next_sequence: Mutex::new(0),
                closed: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.shared.width
    }

    pub fn height(&self) -> u32 {
        self.shared.height
    }

    /// Hand one captured frame to the pipeline. Never blocks.
    pub fn submit(&self, mut frame: RawFrame) -> SubmitOutcome {
        if self.is_closed() {
            return SubmitOutcome::Closed;
        }
        if frame.width != self.shared.width || frame.height != self.shared.height {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                got_w = frame.width,
                got_h = frame.height,
                "rejecting frame with mismatched geometry"
            );
            return SubmitOutcome::Rejected;
        }
        if let Err(e) = frame.validate() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("rejecting frame: {e}");
            return SubmitOutcome::Rejected;
        }

        let mut next = self
            .shared
            .next_sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        frame.sequence = *next;
        match self.shared.queue.push(frame) {
            PushOutcome::Queued => {
                *next += 1;
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Queued
            }
            PushOutcome::Evicted(old) => {
                *next += 1;
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                trace!(dropped = old.sequence, "frame queue full, dropped oldest");
                SubmitOutcome::QueuedDroppedOldest
            }
            PushOutcome::Closed(_) => SubmitOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Unregister the surface; later submissions are refused.
    fn close(&self) -> usize {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queue.close()
    }
}

// ── FrameSource ──────────────────────────────────────────────────

/// Counters exposed through session stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSourceStats {
    pub submitted: u64,
    pub rejected: u64,
    pub queue: QueueStats,
}

/// Owns the capture backend grant and the raw frame queue.
pub struct FrameSource {
    backend: Arc<dyn CaptureBackend>,
    surface: Surface,
    queue: Arc<BoundedQueue<RawFrame>>,
    released: AtomicBool,
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl FrameSource {
    /// Acquire capture for `params` and register a fresh surface.
    ///
    /// Gives up after `limit`, or as soon as `cancel` fires; either way
    /// the backend is told to release whatever it grabbed.
    pub async fn open(
        backend: Arc<dyn CaptureBackend>,
        token: &CaptureToken,
        params: &SessionParams,
        queue_capacity: usize,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, LinkError> {
        let queue = Arc::new(BoundedQueue::new(queue_capacity, OverflowPolicy::DropOldest));
        let surface = Surface::new(params.width, params.height, Arc::clone(&queue));

        // Err carries whether the backend may hold a half-finished grant.
        let outcome = {
            let grab = tokio::time::timeout(limit, backend.acquire(token, surface.clone()));
            tokio::select! {
                _ = cancel.cancelled() => Err((LinkError::Cancelled, true)),
                r = grab => match r {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e @ LinkError::CaptureUnavailable(_))) => Err((e, false)),
                    Ok(Err(e)) => Err((LinkError::CaptureUnavailable(e.to_string()), false)),
                    Err(_) => Err((
                        LinkError::CaptureUnavailable(format!(
                            "acquire took longer than {limit:?}"
                        )),
                        true,
                    )),
                },
            }
        };

        if let Err((error, abandoned)) = outcome {
            surface.close();
            warn!("capture acquisition failed: {error}");
            if abandoned {
                if let Err(e) = backend.release().await {
                    debug!("release after abandoned acquire: {e}");
                }
            }
            return Err(error);
        }

        info!(
            width = params.width,
            height = params.height,
            capacity = queue.capacity(),
            "frame source opened"
        );
        Ok(Self {
            backend,
            surface,
            queue,
            released: AtomicBool::new(false),
        })
    }

    pub fn surface(&self) -> Surface {
        self.surface.clone()
    }

    pub fn queue(&self) -> Arc<BoundedQueue<RawFrame>> {
        Arc::clone(&self.queue)
    }

    /// Stop accepting frames and discard what is queued.
    pub fn close_intake(&self) {
        let discarded = self.surface.close();
        if discarded > 0 {
            debug!(discarded, "discarded queued frames");
        }
    }

    /// Close intake and release the backend. Idempotent.
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.close_intake();
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.backend.release().await;
        match &result {
            Ok(()) => info!("frame source released"),
            Err(e) => warn!("capture release failed: {e}"),
        }
        result
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            submitted: self.surface.shared.submitted.load(Ordering::Relaxed),
            rejected: self.surface.shared.rejected.load(Ordering::Relaxed),
            queue: self.queue.stats(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingBackend {
        acquired: AtomicUsize,
        released: AtomicUsize,
        deny: bool,
        hang: bool,
    }

    #[async_trait]
    impl CaptureBackend for CountingBackend {
        async fn acquire(&self, _token: &CaptureToken, _surface: Surface) -> Result<(), LinkError> {
            if self.deny {
                return Err(LinkError::Other("denied".into()));
            }
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn release(&self) -> Result<(), LinkError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame(w: u32, h: u32) -> RawFrame {
        RawFrame::packed(w, h, PixelFormat::Bgra8, vec![0u8; (w * h * 4) as usize])
    }

    async fn open(backend: Arc<CountingBackend>) -> Result<FrameSource, LinkError> {
        FrameSource::open(
            backend,
            &CaptureToken::new(&b"t"[..]),
            &SessionParams::new(8, 8, 1000),
            3,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn assigns_sequences_and_drops_oldest() {
        let source = open(Arc::new(CountingBackend::default())).await.unwrap();
        let surface = source.surface();
        for _ in 0..5 {
            assert!(matches!(
                surface.submit(frame(8, 8)),
                SubmitOutcome::Queued | SubmitOutcome::QueuedDroppedOldest
            ));
        }
        let stats = source.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.queue.evicted, 2);
        assert_eq!(source.queue().try_pop().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn rejects_wrong_geometry() {
        let source = open(Arc::new(CountingBackend::default())).await.unwrap();
        assert_eq!(source.surface().submit(frame(4, 4)), SubmitOutcome::Rejected);
        assert_eq!(source.stats().rejected, 1);
        assert!(source.queue().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_surface() {
        let backend = Arc::new(CountingBackend::default());
        let source = open(Arc::clone(&backend)).await.unwrap();
        let surface = source.surface();
        surface.submit(frame(8, 8));

        source.stop().await.unwrap();
        source.stop().await.unwrap();

        assert_eq!(backend.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
        assert!(surface.is_closed());
        assert!(source.queue().is_empty());
        assert_eq!(surface.submit(frame(8, 8)), SubmitOutcome::Closed);
    }

    #[tokio::test]
    async fn acquisition_failure_is_capture_unavailable() {
        let backend = Arc::new(CountingBackend {
            deny: true,
            ..Default::default()
        });
        let err = open(backend).await.unwrap_err();
        assert!(matches!(err, LinkError::CaptureUnavailable(_)));
    }

    #[tokio::test]
    async fn denied_acquire_is_not_released() {
        let backend = Arc::new(CountingBackend {
            deny: true,
            ..Default::default()
        });
        open(Arc::clone(&backend)).await.unwrap_err();
        assert_eq!(backend.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hanging_acquire_times_out() {
        let backend = Arc::new(CountingBackend {
            hang: true,
            ..Default::default()
        });
        let err = FrameSource::open(
            backend.clone(),
            &CaptureToken::new(&b"t"[..]),
            &SessionParams::new(8, 8, 1000),
            3,
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LinkError::CaptureUnavailable(_)));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_abandons_acquire() {
        let backend = Arc::new(CountingBackend {
            hang: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = FrameSource::open(
            backend.clone(),
            &CaptureToken::new(&b"t"[..]),
            &SessionParams::new(8, 8, 1000),
            3,
            Duration::from_secs(30),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LinkError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }
}
