//! Session Controller: the lifecycle owner and the host-facing API.
//!
//! ```text
//!  Idle ──start──► Starting ──► Streaming ──stop/fault──► Stopping ──► Idle
//!                     │
//!                     └──error──► Failed ──stop──► Idle
//! ```
//!
//! The state lives in one `watch` channel and changes only through the
//! validated transitions on [`SessionState`]. `start` and `stop` are
//! serialized by an async lifecycle lock; a `stop` issued while a start is
//! still bringing components up cancels it first. Asynchronous faults (viewer
//! gone, encoder error, transport error) reach a per-session supervisor
//! task, which runs the same teardown as `stop` for its own session only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capture::{CaptureBackend, FrameSource, FrameSourceStats, Surface};
use crate::config::SessionConfig;
use crate::encode::{EncoderConfig, EncoderFactory, EncoderPipeline, PipelineEvent, PipelineStats};
use crate::error::LinkError;
use crate::input::{InjectorStats, InputInjector, InputSender, InputSink};
use crate::state::SessionState;
use crate::transport::pairing;
use crate::transport::{
    ConnectionHandle, Handshake, TransportEvent, TransportServer, TransportSetup, TransportStats,
};
use crate::types::{CaptureToken, CodecId, InputEvent, InputKind, SessionParams};

const EVENT_CAPACITY: usize = 32;

// ── Platform ─────────────────────────────────────────────────────

/// Platform capabilities the controller drives.
#[derive(Clone)]
pub struct Platform {
    pub capture: Arc<dyn CaptureBackend>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub input: Arc<dyn InputSink>,
}

// ── Events & info ────────────────────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Requested,
    PeerDisconnected,
    EncoderFault,
    TransportError,
}

/// Lifecycle notifications for the host.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started(SessionInfo),
    PeerConnected { session_id: u64, peer: SocketAddr },
    Ended { session_id: u64, reason: EndReason },
}

/// Facts about the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub params: SessionParams,
    pub codec: CodecId,
    pub started_at: Instant,
    pub listen_addr: SocketAddr,
    pub discovery_addr: Option<SocketAddr>,
    /// Pairing PIN to show the user, when pairing is required.
    pub pin: Option<String>,
}

/// Counters across all components of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: FrameSourceStats,
    pub pipeline: PipelineStats,
    pub transport: TransportStats,
    pub injector: InjectorStats,
    pub connection: Option<ConnectionHandle>,
}

// ── Internals ────────────────────────────────────────────────────

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    frames: FrameSource,
    pipeline: EncoderPipeline,
    injector: InputInjector,
    transport: TransportServer,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Inner {
    config: SessionConfig,
    platform: Platform,
    state: watch::Sender<SessionState>,
    lifecycle: tokio::sync::Mutex<Option<ActiveSession>>,
    /// Token of a start still in `bring_up`; reachable without `lifecycle`.
    pending: Mutex<Option<CancellationToken>>,
    /// Lock-free path for `inject_input`; cleared first on teardown.
    input: Mutex<Option<InputSender>>,
    info: Mutex<Option<SessionInfo>>,
    events: broadcast::Sender<SessionEvent>,
    next_id: AtomicU64,
    ignored_inputs: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    /// Apply a validated transition atomically.
    fn transition(
        &self,
        step: impl FnOnce(&mut SessionState) -> Result<(), LinkError>,
    ) -> Result<SessionState, LinkError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| match step(state) {
            Ok(()) => true,
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result.map(|()| *self.state.borrow())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── SessionController ────────────────────────────────────────────

/// Owns at most one streaming session. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(config: SessionConfig, platform: Platform) -> Result<Self, LinkError> {
        config.validate()?;
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                platform,
                state,
                lifecycle: tokio::sync::Mutex::new(None),
                pending: Mutex::new(None),
                input: Mutex::new(None),
                info: Mutex::new(None),
                events,
                next_id: AtomicU64::new(1),
                ignored_inputs: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn info(&self) -> Option<SessionInfo> {
        lock(&self.inner.info).clone()
    }

    /// `inject_input` calls dropped because no session was streaming.
    pub fn ignored_inputs(&self) -> u64 {
        self.inner.ignored_inputs.load(Ordering::Relaxed)
    }

    /// Counters of the active session, if any.
    pub async fn stats(&self) -> Option<SessionStats> {
        let guard = self.inner.lifecycle.lock().await;
        guard.as_ref().map(|active| SessionStats {
            frames: active.frames.stats(),
            pipeline: active.pipeline.stats(),
            transport: active.transport.stats(),
            injector: active.injector.stats(),
            connection: active.transport.connection(),
        })
    }

    // ── start ────────────────────────────────────────────────────

    /// Bring up capture, encoding, input and transport for one viewer.
    ///
    /// Rejected with `InvalidParameters` (state unchanged) for bad
    /// parameters or while a session is not `Idle`. Any later failure
    /// rolls back what was started and leaves the state `Failed`. A
    /// concurrent [`stop`](Self::stop) aborts the start with
    /// `LinkError::Cancelled` and the session ends up `Idle`.
    pub async fn start(
        &self,
        width: u32,
        height: u32,
        bitrate: u32,
        token: CaptureToken,
    ) -> Result<Surface, LinkError> {
        let params = SessionParams::new(width, height, bitrate);
        params.validate(self.inner.config.max_width, self.inner.config.max_height)?;

        let mut guard = self.inner.lifecycle.lock().await;
        // Published before `Starting` so a stop that sees `Starting` can cancel.
        let cancel = CancellationToken::new();
        *lock(&self.inner.pending) = Some(cancel.clone());
        if let Err(e) = self.inner.transition(SessionState::begin_start) {
            lock(&self.inner.pending).take();
            debug!("start rejected: {e}");
            return Err(LinkError::InvalidParameters(format!(
                "session is {}, not Idle",
                self.state()
            )));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        info!(id, width, height, bitrate, "starting session");

        let brought = self.bring_up(id, params, &token, cancel).await;
        lock(&self.inner.pending).take();

        let (active, info, signals) = match brought {
            Ok(parts) => parts,
            Err(e) => {
                warn!(id, "session start failed: {e}");
                let _ = self.inner.transition(SessionState::fail_start);
                return Err(e);
            }
        };

        let surface = active.frames.surface();
        *lock(&self.inner.input) = active.injector.sender();
        *lock(&self.inner.info) = Some(info.clone());
        let cancel = active.cancel.clone();
        *guard = Some(active);
        self.inner.transition(SessionState::complete_start)?;

        tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            id,
            cancel,
            signals,
        ));
        info!(id, listen = %info.listen_addr, "session streaming");
        self.inner.emit(SessionEvent::Started(info));
        Ok(surface)
    }

    /// Open components in order, unwinding in reverse on failure.
    async fn bring_up(
        &self,
        id: u64,
        params: SessionParams,
        token: &CaptureToken,
        cancel: CancellationToken,
    ) -> Result<(ActiveSession, SessionInfo, Signals), LinkError> {
        let cfg = &self.inner.config;
        let platform = &self.inner.platform;
        let drain = cfg.drain_timeout();
        let limit = cfg.start_timeout();
        let started_at = Instant::now();

        let frames = FrameSource::open(
            Arc::clone(&platform.capture),
            token,
            &params,
            cfg.frame_queue_capacity,
            limit,
            &cancel,
        )
        .await?;

        let (pipeline_tx, pipeline_rx) = mpsc::channel(4);
        let encoder_config = EncoderConfig {
            width: params.width,
            height: params.height,
            bitrate: params.bitrate,
            frame_rate: cfg.frame_rate,
            key_frame_interval_ms: cfg.key_frame_interval_ms,
            epoch: started_at,
        };
        let mut pipeline = match EncoderPipeline::start(
            platform.encoders.as_ref(),
            encoder_config,
            frames.queue(),
            cfg.unit_queue_capacity,
            pipeline_tx,
            cancel.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                let _ = tokio::time::timeout(drain, frames.stop()).await;
                return Err(e);
            }
        };

        let mut injector = InputInjector::spawn(
            Arc::clone(&platform.input),
            params.width,
            params.height,
            cfg.input_queue_capacity,
        );

        let pin = cfg.transport.require_pin.then(|| {
            cfg.transport
                .fixed_pin
                .clone()
                .unwrap_or_else(pairing::generate_pin)
        });
        let (transport_tx, transport_rx) = mpsc::channel(8);
        let setup = injector.sender().map(|input| TransportSetup {
            handshake: Handshake {
                width: params.width,
                height: params.height,
                codec: pipeline.codec(),
                bitrate: params.bitrate,
            },
            pin: pin.clone(),
            units: pipeline.units(),
            key_frames: pipeline.key_frame_request(),
            input,
            events: transport_tx,
        });
        let bound = match setup {
            Some(setup) => {
                let bind = TransportServer::bind(cfg.transport.clone(), setup, &cancel);
                bounded(&cancel, limit, bind).await
            }
            None => Err(LinkError::ChannelClosed),
        };
        let transport = match bound {
            Ok(transport) => transport,
            Err(e) => {
                cancel.cancel();
                let _ = injector.shutdown(drain).await;
                let _ = pipeline.shutdown(drain).await;
                let _ = tokio::time::timeout(drain, frames.stop()).await;
                return Err(e);
            }
        };

        let info = SessionInfo {
            id,
            params,
            codec: pipeline.codec(),
            started_at,
            listen_addr: transport.local_addr(),
            discovery_addr: transport.discovery_addr(),
            pin,
        };
        let active = ActiveSession {
            id,
            cancel,
            frames,
            pipeline,
            injector,
            transport,
        };
        let signals = Signals {
            pipeline: pipeline_rx,
            transport: transport_rx,
        };
        Ok((active, info, signals))
    }

    // ── stop ─────────────────────────────────────────────────────

    /// Tear down the session and return to `Idle`. A no-op when `Idle`.
    pub async fn stop(&self) {
        if let Some(pending) = lock(&self.inner.pending).as_ref() {
            debug!("stop requested during start, cancelling");
            pending.cancel();
        }
        shutdown(&self.inner, None, EndReason::Requested).await;
    }

    // ── inject_input ─────────────────────────────────────────────

    /// Queue a local input event. Ignored (and counted) unless streaming.
    pub fn inject_input(&self, kind: InputKind, x: i32, y: i32, key_code: i32, action_code: i32) {
        if !self.state().accepts_input() {
            self.inner.ignored_inputs.fetch_add(1, Ordering::Relaxed);
            trace!(?kind, "input ignored, not streaming");
            return;
        }
        let sender = lock(&self.inner.input).clone();
        match sender {
            Some(tx) => {
                tx.try_submit(InputEvent::new(kind, x, y, key_code, action_code));
            }
            None => {
                self.inner.ignored_inputs.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Run a start step unless the start is cancelled or `limit` passes.
async fn bounded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    step: impl Future<Output = Result<T, LinkError>>,
) -> Result<T, LinkError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(LinkError::Cancelled),
        r = tokio::time::timeout(limit, step) => r.map_err(|_| LinkError::Timeout(limit))?,
    }
}

// ── Teardown ─────────────────────────────────────────────────────

/// Stop the session if it is still `expected` (any session when `None`).
async fn shutdown(inner: &Inner, expected: Option<u64>, reason: EndReason) {
    let mut guard = inner.lifecycle.lock().await;

    let current = *inner.state.borrow();
    match current {
        SessionState::Idle => return,
        SessionState::Failed if expected.is_none() => {
            let _ = inner.transition(SessionState::begin_stop);
            let _ = inner.transition(SessionState::finish_stop);
            info!("failed session reset to Idle");
            return;
        }
        _ => {}
    }
    if let Some(id) = expected {
        if guard.as_ref().map(|a| a.id) != Some(id) {
            debug!(id, "ignoring stale teardown request");
            return;
        }
    }
    let Some(mut active) = guard.take() else {
        return;
    };

    let id = active.id;
    info!(id, ?reason, "stopping session");
    *lock(&inner.input) = None;
    if let Err(e) = inner.transition(SessionState::begin_stop) {
        warn!(id, "{e}");
    }

    let drain = inner.config.drain_timeout();
    active.frames.close_intake();
    active.cancel.cancel();
    if let Err(e) = active.transport.shutdown(drain).await {
        warn!(id, "transport shutdown: {e}");
    }
    if let Err(e) = active.pipeline.shutdown(drain).await {
        warn!(id, "encoder shutdown: {e}");
    }
    if let Err(e) = active.injector.shutdown(drain).await {
        warn!(id, "injector shutdown: {e}");
    }
    match tokio::time::timeout(drain, active.frames.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(id, "capture release: {e}"),
        Err(_) => warn!(id, "capture release timed out"),
    }
    drop(active);

    *lock(&inner.info) = None;
    if let Err(e) = inner.transition(SessionState::finish_stop) {
        warn!(id, "{e}");
    }
    info!(id, ?reason, "session stopped");
    inner.emit(SessionEvent::Ended {
        session_id: id,
        reason,
    });
}

// ── Supervisor ───────────────────────────────────────────────────

struct Signals {
    pipeline: mpsc::Receiver<PipelineEvent>,
    transport: mpsc::Receiver<TransportEvent>,
}

/// Turn component failures into teardown of session `id`.
async fn supervise(inner: Weak<Inner>, id: u64, cancel: CancellationToken, mut signals: Signals) {
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            Some(event) = signals.pipeline.recv() => match event {
                PipelineEvent::EncoderFault(e) => {
                    warn!(id, "encoder fault: {e}");
                    break EndReason::EncoderFault;
                }
            },
            Some(event) = signals.transport.recv() => match event {
                TransportEvent::PeerConnected(peer) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.emit(SessionEvent::PeerConnected { session_id: id, peer });
                    }
                }
                TransportEvent::PeerDisconnected(peer) => {
                    info!(id, %peer, "viewer left, ending session");
                    break EndReason::PeerDisconnected;
                }
                TransportEvent::Fault { peer, error } => {
                    warn!(id, %peer, "transport error: {error}");
                    break EndReason::TransportError;
                }
            },
            else => return,
        }
    };
    if let Some(inner) = inner.upgrade() {
        shutdown(&inner, Some(id), reason).await;
    }
}
