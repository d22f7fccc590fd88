//! Input Injector: remote pointer/key events into the local input system.
//!
//! Events go through a bounded FIFO to a dedicated blocking thread.
//! That thread validates each event, clamps it and hands it to the
//! platform [`InputSink`], strictly in arrival order. Nothing here is
//! fatal: bad events and sink failures are counted and logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::types::InputEvent;

/// Pointer kinds carry a pointer index below this bound.
pub const MAX_POINTERS: i32 = 10;

// ── InputSink ────────────────────────────────────────────────────

/// Platform input capability. Called from a blocking thread.
pub trait InputSink: Send + Sync {
    fn inject(&self, event: &InputEvent) -> Result<(), LinkError>;
}

// ── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    injected: AtomicU64,
    clamped: AtomicU64,
    dropped_unknown: AtomicU64,
    dropped_full: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of injector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectorStats {
    pub received: u64,
    pub injected: u64,
    /// Injected after moving the coordinates into bounds.
    pub clamped: u64,
    /// Unknown kind or action code.
    pub dropped_unknown: u64,
    /// Caller-side submissions refused by a full queue.
    pub dropped_full: u64,
    pub failed: u64,
}

// ── Validation ───────────────────────────────────────────────────

/// Outcome of preparing one event for injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    Ready(InputEvent),
    Clamped(InputEvent),
    Rejected(&'static str),
}

/// Check the action code and clamp pointer coordinates into
/// `[0, width) × [0, height)`.
pub fn prepare(mut event: InputEvent, width: u32, height: u32) -> Prepared {
    if event.kind.is_pointer() {
        if !(0..MAX_POINTERS).contains(&event.action_code) {
            return Prepared::Rejected("pointer index out of range");
        }
        let max_x = width.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_y = height.saturating_sub(1).min(i32::MAX as u32) as i32;
        let (x, y) = (event.x.clamp(0, max_x), event.y.clamp(0, max_y));
        if (x, y) != (event.x, event.y) {
            event.x = x;
            event.y = y;
            return Prepared::Clamped(event);
        }
    } else if event.action_code < 0 {
        return Prepared::Rejected("negative key repeat count");
    }
    Prepared::Ready(event)
}

// ── InputSender ──────────────────────────────────────────────────

/// Producer handle onto the injector queue.
#[derive(Clone)]
pub struct InputSender {
    tx: mpsc::Sender<InputEvent>,
    counters: Arc<Counters>,
}

impl InputSender {
    /// Enqueue, waiting for room. Used by the connection reader, which
    /// must not reorder or drop events.
    pub async fn submit(&self, event: InputEvent) -> Result<(), LinkError> {
        self.tx.send(event).await?;
        Ok(())
    }

    /// Enqueue without waiting; a full queue drops the event.
    pub fn try_submit(&self, event: InputEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped_full.fetch_add(1, Ordering::Relaxed);
                debug!("input queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Count an event whose kind code did not decode.
    pub fn note_unknown(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.counters.dropped_unknown.fetch_add(1, Ordering::Relaxed);
    }
}

// ── InputInjector ────────────────────────────────────────────────

/// Owns the blocking injection thread.
pub struct InputInjector {
    sender: Option<InputSender>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl InputInjector {
    pub fn spawn(sink: Arc<dyn InputSink>, width: u32, height: u32, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let worker = {
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            let handle = Handle::current();
            tokio::task::spawn_blocking(move || {
                run(handle, sink, rx, width, height, counters, cancel)
            })
        };
        info!(width, height, capacity, "input injector started");

        Self {
            sender: Some(InputSender {
                tx,
                counters: Arc::clone(&counters),
            }),
            counters,
            cancel,
            worker: Some(worker),
        }
    }

    /// A new producer handle, or `None` after shutdown.
    pub fn sender(&self) -> Option<InputSender> {
        self.sender.clone()
    }

    pub fn stats(&self) -> InjectorStats {
        let c = &self.counters;
        InjectorStats {
            received: c.received.load(Ordering::Relaxed),
            injected: c.injected.load(Ordering::Relaxed),
            clamped: c.clamped.load(Ordering::Relaxed),
            dropped_unknown: c.dropped_unknown.load(Ordering::Relaxed),
            dropped_full: c.dropped_full.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop injecting; queued events are discarded. The thread exits on
    /// cancellation even while other [`InputSender`] clones are alive.
    /// Idempotent.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.cancel.cancel();
        self.sender = None;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Other(format!("input thread panicked: {e}"))),
            Err(_) => {
                warn!(?timeout, "input thread did not stop in time");
                Err(LinkError::Timeout(timeout))
            }
        }
    }
}

fn run(
    handle: Handle,
    sink: Arc<dyn InputSink>,
    mut rx: mpsc::Receiver<InputEvent>,
    width: u32,
    height: u32,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let next = handle.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = rx.recv() => event,
            }
        });
        let Some(event) = next else {
            break;
        };
        counters.received.fetch_add(1, Ordering::Relaxed);
        let event = match prepare(event, width, height) {
            Prepared::Ready(ev) => ev,
            Prepared::Clamped(ev) => {
                counters.clamped.fetch_add(1, Ordering::Relaxed);
                ev
            }
            Prepared::Rejected(reason) => {
                counters.dropped_unknown.fetch_add(1, Ordering::Relaxed);
                debug!(?event.kind, action = event.action_code, "{reason}");
                continue;
            }
        };
        match sink.inject(&event) {
            Ok(()) => {
                counters.injected.fetch_add(1, Ordering::Relaxed);
                trace!(?event.kind, x = event.x, y = event.y, "injected");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("input injection failed: {e}");
            }
        }
    }
    rx.close();
    debug!("input thread exited");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<InputEvent>>,
        fail_keys: bool,
    }

    impl InputSink for Recorder {
        fn inject(&self, event: &InputEvent) -> Result<(), LinkError> {
            if self.fail_keys && !event.kind.is_pointer() {
                return Err(LinkError::Other("no keyboard".into()));
            }
            self.events.lock().unwrap().push(*event);
            Ok(())
        }
    }

    #[test]
    fn clamps_into_bounds() {
        let ev = InputEvent::pointer(InputKind::PointerDown, 2000, -3);
        match prepare(ev, 1280, 720) {
            Prepared::Clamped(ev) => assert_eq!((ev.x, ev.y), (1279, 0)),
            other => panic!("expected clamp, got {other:?}"),
        }
        let inside = InputEvent::pointer(InputKind::PointerMove, 1279, 719);
        assert!(matches!(prepare(inside, 1280, 720), Prepared::Ready(_)));
    }

    #[test]
    fn action_codes_are_checked() {
        let mut ev = InputEvent::pointer(InputKind::PointerUp, 1, 1);
        ev.action_code = MAX_POINTERS;
        assert!(matches!(prepare(ev, 10, 10), Prepared::Rejected(_)));

        let mut key = InputEvent::key(InputKind::KeyDown, 29);
        key.action_code = -1;
        assert!(matches!(prepare(key, 10, 10), Prepared::Rejected(_)));
        key.action_code = 3;
        assert!(matches!(prepare(key, 10, 10), Prepared::Ready(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn injects_in_order_and_counts_failures() {
        let sink = Arc::new(Recorder {
            fail_keys: true,
            ..Default::default()
        });
        let mut injector = InputInjector::spawn(sink.clone(), 100, 100, 8);
        let tx = injector.sender().unwrap();

        for x in 0..5 {
            tx.submit(InputEvent::pointer(InputKind::PointerMove, x * 50, 10))
                .await
                .unwrap();
        }
        tx.submit(InputEvent::key(InputKind::KeyDown, 4)).await.unwrap();
        tx.note_unknown();
        drop(tx);

        // Wait for the thread to drain what was queued.
        for _ in 0..100 {
            if injector.stats().received >= 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        injector.shutdown(Duration::from_secs(1)).await.unwrap();

        let xs: Vec<i32> = sink.events.lock().unwrap().iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![0, 50, 99, 99, 99]);
        let stats = injector.stats();
        assert_eq!(stats.injected, 5);
        assert_eq!(stats.clamped, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped_unknown, 1);
        assert!(injector.sender().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_joins_while_senders_are_alive() {
        let sink = Arc::new(Recorder::default());
        let mut injector = InputInjector::spawn(sink.clone(), 100, 100, 8);
        // The connection reader keeps its own clone until it is torn down.
        let held = injector.sender().unwrap();

        let started = std::time::Instant::now();
        injector.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        // The thread dropped its sink handle when it exited.
        assert_eq!(Arc::strong_count(&sink), 1);
        assert!(!held.try_submit(InputEvent::pointer(InputKind::PointerMove, 1, 1)));
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
