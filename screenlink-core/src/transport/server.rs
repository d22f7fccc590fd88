//! Single-viewer TCP server.
//!
//! Task layout:
//!
//! ```text
//!  accept task ──► connection task (pairing → handshake → attach)
//!                        ├── writer: replay GOP, then per-peer channel
//!                        └── reader: 17-byte input → injector
//!  pump task: unit queue ──► GOP cache + attached peer channel
//! ```
//!
//! While a viewer is connected, further connections are closed at once.
//! A session-ending outcome (clean EOF, I/O error, timeout, malformed
//! input) is reported through [`TransportEvent`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::encode::KeyFrameRequest;
use crate::error::LinkError;
use crate::input::InputSender;
use crate::queue::BoundedQueue;
use crate::state::ConnectionState;
use crate::transport::cache::GopCache;
use crate::transport::codec::{Handshake, InputMessage, Outbound, ServerCodec};
use crate::transport::discovery::{Announcement, DiscoveryResponder};
use crate::transport::pairing;
use crate::types::EncodedUnit;

type PeerSink = futures::stream::SplitSink<Framed<TcpStream, ServerCodec>, Outbound>;
type PeerStream = futures::stream::SplitStream<Framed<TcpStream, ServerCodec>>;

// ── Public types ─────────────────────────────────────────────────

/// Connection outcomes the session supervisor reacts to.
#[derive(Debug)]
pub enum TransportEvent {
    PeerConnected(SocketAddr),
    /// The viewer closed its side cleanly.
    PeerDisconnected(SocketAddr),
    /// I/O error, timeout or malformed input on the attached connection.
    Fault { peer: SocketAddr, error: LinkError },
}

/// Snapshot of the current viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub since: Instant,
}

/// Everything the server needs from the rest of the session.
pub struct TransportSetup {
    pub handshake: Handshake,
    /// Required pairing PIN, if any.
    pub pin: Option<String>,
    pub units: Arc<BoundedQueue<EncodedUnit>>,
    pub key_frames: KeyFrameRequest,
    pub input: InputSender,
    pub events: mpsc::Sender<TransportEvent>,
}

/// Snapshot of transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub accepted: u64,
    pub rejected_busy: u64,
    pub pairing_failures: u64,
    pub units_sent: u64,
    pub units_replayed: u64,
    /// Deltas withheld while waiting for a key-frame.
    pub units_skipped: u64,
    pub bytes_sent: u64,
    pub inputs_received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected_busy: AtomicU64,
    pairing_failures: AtomicU64,
    units_sent: AtomicU64,
    units_replayed: AtomicU64,
    units_skipped: AtomicU64,
    bytes_sent: AtomicU64,
    inputs_received: AtomicU64,
}

// ── Shared state ─────────────────────────────────────────────────

struct Peer {
    id: u64,
    handle: ConnectionHandle,
    /// Present once the viewer is attached to the unit stream.
    tx: Option<mpsc::Sender<EncodedUnit>>,
}

struct Slot {
    cache: GopCache,
    peer: Option<Peer>,
}

struct Shared {
    config: TransportConfig,
    handshake: Handshake,
    pin: Option<String>,
    units: Arc<BoundedQueue<EncodedUnit>>,
    key_frames: KeyFrameRequest,
    input: InputSender,
    events: mpsc::Sender<TransportEvent>,
    slot: Mutex<Slot>,
    counters: Counters,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, event: TransportEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("transport event dropped: {e}");
        }
    }

    /// Clear the slot if it still belongs to connection `id`.
    fn detach(&self, id: u64) {
        let mut slot = self.slot();
        if slot.peer.as_ref().is_some_and(|p| p.id == id) {
            slot.peer = None;
        }
    }
}

// ── TransportServer ──────────────────────────────────────────────

pub struct TransportServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    discovery: Option<DiscoveryResponder>,
}

impl TransportServer {
    /// Bind the listener (and discovery responder) and start serving.
    ///
    /// `cancel` is the session token; the server derives a child token.
    pub async fn bind(
        config: TransportConfig,
        setup: TransportSetup,
        cancel: &CancellationToken,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let cancel = cancel.child_token();

        let discovery = match config.discovery_port {
            Some(port) => {
                let announcement = Announcement {
                    name: config.device_name.clone(),
                    port: local_addr.port(),
                    width: setup.handshake.width,
                    height: setup.handshake.height,
                    codec: setup.handshake.codec,
                    pin_required: setup.pin.is_some(),
                };
                let addr = SocketAddr::new(config.bind_address, port);
                Some(DiscoveryResponder::bind(addr, announcement, cancel.clone()).await?)
            }
            None => None,
        };

        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                cache: GopCache::new(config.max_gop_units),
                peer: None,
            }),
            config,
            handshake: setup.handshake,
            pin: setup.pin,
            units: setup.units,
            key_frames: setup.key_frames,
            input: setup.input,
            events: setup.events,
            counters: Counters::default(),
        });

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            cancel.clone(),
        ));
        let pump_task = tokio::spawn(pump(Arc::clone(&shared), cancel.clone()));

        info!(%local_addr, pin = shared.pin.is_some(), "transport listening");
        Ok(Self {
            local_addr,
            shared,
            cancel,
            accept_task: Some(accept_task),
            pump_task: Some(pump_task),
            discovery,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().map(DiscoveryResponder::local_addr)
    }

    /// The current viewer connection, if any.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.shared.slot().peer.as_ref().map(|p| p.handle)
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.shared.counters;
        TransportStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected_busy: c.rejected_busy.load(Ordering::Relaxed),
            pairing_failures: c.pairing_failures.load(Ordering::Relaxed),
            units_sent: c.units_sent.load(Ordering::Relaxed),
            units_replayed: c.units_replayed.load(Ordering::Relaxed),
            units_skipped: c.units_skipped.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            inputs_received: c.inputs_received.load(Ordering::Relaxed),
        }
    }

    /// Close the listener and any viewer connection. Idempotent.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.cancel.cancel();
        if let Some(peer) = self.shared.slot().peer.as_mut() {
            // Still pairing or in the handshake: nothing to flush.
            if peer.handle.state.begin_close().is_err() {
                peer.handle.state.force_close();
            }
            peer.tx = None;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut timed_out = false;
        for task in [self.accept_task.take(), self.pump_task.take()]
            .into_iter()
            .flatten()
        {
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                timed_out = true;
            }
        }
        if let Some(discovery) = self.discovery.take() {
            if tokio::time::timeout_at(deadline, discovery.join()).await.is_err() {
                timed_out = true;
            }
        }

        {
            let mut slot = self.shared.slot();
            slot.peer = None;
            slot.cache.clear();
        }
        if timed_out {
            warn!(?timeout, "transport tasks did not stop in time");
            return Err(LinkError::Timeout(timeout));
        }
        info!(local_addr = %self.local_addr, "transport closed");
        Ok(())
    }
}

// ── Accept ───────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut connections = JoinSet::new();
    let mut next_id = 0u64;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            r = listener.accept() => r,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        {
            let mut slot = shared.slot();
            if let Some(current) = &slot.peer {
                shared.counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                debug!(%addr, current = %current.handle.peer, "viewer already attached, closing");
                continue;
            }
            next_id += 1;
            slot.peer = Some(Peer {
                id: next_id,
                handle: ConnectionHandle {
                    peer: addr,
                    state: ConnectionState::Connecting,
                    since: Instant::now(),
                },
                tx: None,
            });
        }
        shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
        info!(%addr, "viewer connecting");
        connections.spawn(serve(stream, addr, next_id, Arc::clone(&shared), cancel.clone()));
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!("accept loop stopped");
}

// ── Pump ─────────────────────────────────────────────────────────

/// Drain encoder output into the GOP cache and the attached viewer.
async fn pump(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let unit = tokio::select! {
            _ = cancel.cancelled() => break,
            unit = shared.units.pop() => match unit {
                Some(unit) => unit,
                None => break,
            },
        };
        let tx = {
            let mut slot = shared.slot();
            slot.cache.push(&unit);
            slot.peer.as_ref().and_then(|p| p.tx.clone())
        };
        if let Some(tx) = tx {
            tokio::select! {
                _ = cancel.cancelled() => break,
                // A closed channel means the viewer is going away.
                _ = tx.send(unit) => {}
            }
        }
    }
    debug!("pump stopped");
}

// ── Connection ───────────────────────────────────────────────────

enum Outcome {
    Shutdown,
    Disconnected,
    Fault(LinkError),
}

async fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    id: u64,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);

    // Pairing and handshake. Failures here drop the socket only.
    let greet = async {
        if let Some(pin) = &shared.pin {
            pairing::challenge(&mut stream, pin).await.inspect_err(|_| {
                shared.counters.pairing_failures.fetch_add(1, Ordering::Relaxed);
            })?;
        }
        let mut framed = Framed::new(stream, ServerCodec::new(shared.config.max_payload_bytes));
        framed.send(Outbound::Handshake(shared.handshake)).await?;
        Ok::<_, LinkError>(framed)
    };
    let greeted = tokio::select! {
        _ = cancel.cancelled() => None,
        r = tokio::time::timeout(shared.config.handshake_timeout(), greet) => Some(r),
    };
    let framed = match greeted {
        None => {
            shared.detach(id);
            return;
        }
        Some(Ok(Ok(framed))) => framed,
        Some(Ok(Err(e))) => {
            warn!(%addr, "viewer setup failed: {e}");
            shared.detach(id);
            return;
        }
        Some(Err(_)) => {
            warn!(%addr, "viewer setup timed out");
            shared.detach(id);
            return;
        }
    };

    // Attach: snapshot the cache and start receiving live units atomically.
    let (tx, rx) = mpsc::channel(shared.config.peer_queue_capacity);
    let (replay, current) = {
        let mut slot = shared.slot();
        let replay = slot.cache.replay();
        let current = slot.cache.is_current();
        match slot.peer.as_mut() {
            Some(peer) if peer.id == id => {
                peer.tx = Some(tx);
                if let Err(e) = peer.handle.state.establish() {
                    warn!(%addr, "{e}");
                }
            }
            _ => return,
        }
        (replay, current)
    };
    if !current {
        shared.key_frames.request();
    }
    info!(%addr, replay = replay.len(), "viewer attached");
    shared.report(TransportEvent::PeerConnected(addr));

    let (sink, stream) = framed.split();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Outcome::Shutdown,
        r = write_loop(sink, replay, rx, &shared) => match r {
            Ok(()) => Outcome::Shutdown,
            Err(e) => Outcome::Fault(e),
        },
        r = read_loop(stream, &shared) => match r {
            Ok(()) => Outcome::Disconnected,
            Err(e) => Outcome::Fault(e),
        },
    };

    shared.detach(id);
    match outcome {
        Outcome::Shutdown => debug!(%addr, "viewer connection closed by server"),
        Outcome::Disconnected => {
            info!(%addr, "viewer disconnected");
            shared.report(TransportEvent::PeerDisconnected(addr));
        }
        Outcome::Fault(error) => {
            warn!(%addr, "viewer connection failed: {error}");
            shared.report(TransportEvent::Fault { peer: addr, error });
        }
    }
}

/// Admits units only while the viewer can decode them.
struct SyncGate {
    synced: bool,
    next: Option<u64>,
}

impl SyncGate {
    fn admit(&mut self, unit: &EncodedUnit) -> bool {
        let contiguous = self.next == Some(unit.sequence);
        self.next = Some(unit.sequence + 1);
        if unit.is_key_frame() {
            self.synced = true;
        } else if !contiguous {
            self.synced = false;
        }
        self.synced
    }
}

async fn write_loop(
    mut sink: PeerSink,
    replay: Vec<EncodedUnit>,
    mut rx: mpsc::Receiver<EncodedUnit>,
    shared: &Shared,
) -> Result<(), LinkError> {
    let timeout = shared.config.write_timeout();
    let counters = &shared.counters;
    let mut gate = SyncGate {
        synced: false,
        next: None,
    };

    counters
        .units_replayed
        .fetch_add(replay.len() as u64, Ordering::Relaxed);
    let mut replay = replay.into_iter();

    loop {
        let unit = match replay.next() {
            Some(unit) => unit,
            None => match rx.recv().await {
                Some(unit) => unit,
                None => return Ok(()),
            },
        };
        let was_synced = gate.synced;
        if !gate.admit(&unit) {
            counters.units_skipped.fetch_add(1, Ordering::Relaxed);
            if was_synced {
                debug!(seq = unit.sequence, "sequence gap, waiting for key-frame");
                shared.key_frames.request();
            }
            continue;
        }

        let (seq, len) = (unit.sequence, unit.payload.len() as u64);
        tokio::time::timeout(timeout, sink.send(Outbound::Video(unit)))
            .await
            .map_err(|_| LinkError::Timeout(timeout))??;
        counters.units_sent.fetch_add(1, Ordering::Relaxed);
        counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
        trace!(seq, len, "unit sent");
    }
}

async fn read_loop(mut stream: PeerStream, shared: &Shared) -> Result<(), LinkError> {
    let timeout = shared.config.read_timeout();
    loop {
        let msg: InputMessage = match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => return Err(LinkError::Timeout(timeout)),
            Ok(None) => return Ok(()),
            Ok(Some(msg)) => msg?,
        };
        shared.counters.inputs_received.fetch_add(1, Ordering::Relaxed);
        match msg.into_event() {
            Ok(Some(event)) => shared.input.submit(event).await?,
            Ok(None) => trace!("keepalive"),
            Err(e) => {
                debug!("dropping input: {e}");
                shared.input.note_unknown();
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
