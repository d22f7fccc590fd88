//! LAN discovery over UDP.
//!
//! A viewer broadcasts [`DISCOVERY_REQUEST`]; every responder answers
//! with a JSON [`Announcement`] describing how to connect.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::types::CodecId;

pub const DISCOVERY_REQUEST: &[u8] = b"SCREENLINK_DISCOVER";

/// Reply body sent to a probing viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub name: String,
    /// TCP port of the stream listener.
    pub port: u16,
    pub width: u32,
    pub height: u32,
    pub codec: CodecId,
    pub pin_required: bool,
}

/// Answers probes until cancelled.
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl DiscoveryResponder {
    pub async fn bind(
        addr: SocketAddr,
        announcement: Announcement,
        cancel: CancellationToken,
    ) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let reply = serde_json::to_vec(&announcement)
            .map_err(|e| LinkError::Other(format!("announcement encode failed: {e}")))?;
        info!(%local_addr, "discovery responder listening");

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = socket.recv_from(&mut buf) => r,
                };
                match received {
                    Ok((n, peer)) if &buf[..n] == DISCOVERY_REQUEST => {
                        debug!(%peer, "discovery probe");
                        if let Err(e) = socket.send_to(&reply, peer).await {
                            warn!(%peer, "discovery reply failed: {e}");
                        }
                    }
                    Ok((_, peer)) => debug!(%peer, "ignoring unknown datagram"),
                    Err(e) => {
                        warn!("discovery socket error: {e}");
                        break;
                    }
                }
            }
            debug!("discovery responder stopped");
        });

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the responder task after its token was cancelled.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Probe `target` (a broadcast or unicast address) and collect answers
/// arriving within `wait`.
pub async fn discover(
    target: SocketAddr,
    wait: Duration,
) -> Result<Vec<(SocketAddr, Announcement)>, LinkError> {
    let bind: SocketAddr = if target.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.set_broadcast(true)?;
    socket.send_to(DISCOVERY_REQUEST, target).await?;

    let mut found = Vec::new();
    let mut buf = vec![0u8; 2048];
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let recv = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let Ok(recv) = recv else { break };
        let (n, from) = recv?;
        match serde_json::from_slice::<Announcement>(&buf[..n]) {
            Ok(ann) => found.push((from, ann)),
            Err(e) => debug!(%from, "ignoring malformed announcement: {e}"),
        }
    }
    Ok(found)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> Announcement {
        Announcement {
            name: "test-device".into(),
            port: 8000,
            width: 1280,
            height: 720,
            codec: CodecId::ZstdTiles,
            pin_required: true,
        }
    }

    #[test]
    fn announcement_json_shape() {
        let json = serde_json::to_string(&announcement()).unwrap();
        assert!(json.contains("\"codec\":\"zstd_tiles\""));
        assert!(json.contains("\"pin_required\":true"));
    }

    #[tokio::test]
    async fn probe_gets_announcement() {
        let cancel = CancellationToken::new();
        let responder =
            DiscoveryResponder::bind("127.0.0.1:0".parse().unwrap(), announcement(), cancel.clone())
                .await
                .unwrap();

        let found = discover(responder.local_addr(), Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, announcement());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), responder.join())
            .await
            .unwrap();
    }
}
