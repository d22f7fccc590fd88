//! Host daemon core logic.
//!
//! Wraps one [`SessionController`] around the synthetic capture backend
//! and the built-in tile encoder, keeps a session open for viewers and
//! starts a fresh one whenever the previous session ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use screenlink_core::{
    CaptureToken, EndReason, ErrorKind, LinkError, Platform, SessionController, SessionEvent,
    ZstdTileFactory,
};

use crate::capture::SyntheticCapture;
use crate::config::ServerConfig;
use crate::input::LoggingInputSink;

const SYNTHETIC_TOKEN: &[u8] = b"synthetic-display";

// ── HostService ──────────────────────────────────────────────────

pub struct HostService {
    config: ServerConfig,
    controller: SessionController,
    stop: CancellationToken,
}

impl HostService {
    pub fn new(config: ServerConfig) -> Result<Self, LinkError> {
        let platform = Platform {
            capture: Arc::new(SyntheticCapture::new(
                config.capture.pattern,
                config.session.frame_rate,
            )),
            encoders: Arc::new(ZstdTileFactory {
                tile_size: config.capture.tile_size.max(8),
            }),
            input: Arc::new(LoggingInputSink::default()),
        };
        let controller = SessionController::new(config.to_session_config(), platform)?;
        Ok(Self {
            config,
            controller,
            stop: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops the service.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Run sessions until stopped.
    ///
    /// Parameter errors end the service; anything else is retried after
    /// `restart_delay_ms` when `restart_on_end` is set.
    pub async fn run(&self) -> Result<(), LinkError> {
        let s = &self.config.session;
        let delay = Duration::from_millis(s.restart_delay_ms);
        let mut events = self.controller.subscribe();

        loop {
            let token = CaptureToken::new(SYNTHETIC_TOKEN);
            match self.controller.start(s.width, s.height, s.bitrate, token).await {
                Ok(_surface) => self.announce(),
                Err(e) if e.kind() == ErrorKind::InvalidParameters => {
                    error!("cannot start session: {e}");
                    return Err(e);
                }
                Err(e) => {
                    error!("session start failed: {e}");
                    self.controller.stop().await;
                    if !s.restart_on_end || !self.pause(delay).await {
                        break;
                    }
                    continue;
                }
            }

            let reason = tokio::select! {
                _ = self.stop.cancelled() => break,
                reason = wait_for_end(&mut events) => reason,
            };
            info!(?reason, "session ended");
            if !s.restart_on_end || !self.pause(delay).await {
                break;
            }
        }

        self.controller.stop().await;
        info!("host service stopped");
        Ok(())
    }

    fn announce(&self) {
        let Some(info) = self.controller.info() else {
            return;
        };
        info!(
            id = info.id,
            listen = %info.listen_addr,
            width = info.params.width,
            height = info.params.height,
            codec = ?info.codec,
            "waiting for a viewer"
        );
        if let Some(addr) = info.discovery_addr {
            info!(%addr, "answering discovery probes");
        }
        if let Some(pin) = &info.pin {
            info!("pairing PIN: {pin}");
        }
    }

    /// Sleep unless stopped first; `false` when stopped.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn wait_for_end(events: &mut broadcast::Receiver<SessionEvent>) -> EndReason {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Ended { reason, .. }) => return reason,
            Ok(SessionEvent::PeerConnected { peer, .. }) => info!(%peer, "viewer connected"),
            Ok(SessionEvent::Started(_)) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(n, "missed session events"),
            Err(broadcast::error::RecvError::Closed) => return EndReason::Requested,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Pattern;
    use screenlink_core::{SessionState, TileDecoder, ViewerClient};

    fn small_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.network.bind_address = [127, 0, 0, 1].into();
        config.network.port = 0;
        config.session.width = 64;
        config.session.height = 48;
        config.session.restart_delay_ms = 10;
        config.capture.pattern = Pattern::MovingBar;
        config.capture.tile_size = 16;
        config
    }

    async fn listen_addr(service: &HostService) -> std::net::SocketAddr {
        for _ in 0..200 {
            if let Some(info) = service.controller().info() {
                return info.listen_addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never started");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn serves_decodable_video_and_restarts() {
        let service = Arc::new(HostService::new(small_config()).unwrap());
        let stop = service.stop_handle();
        let runner = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.run().await }
        });

        let addr = listen_addr(&service).await;
        let first_id = service.controller().info().unwrap().id;
        let mut client = ViewerClient::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        let mut decoder = TileDecoder::new(64, 48);
        let mut full_frames = 0;
        for _ in 0..5 {
            let unit = client.next_unit().await.unwrap().unwrap();
            if decoder.decode(&unit.payload).unwrap().full_frame {
                full_frames += 1;
            }
        }
        assert!(full_frames >= 1);
        assert_eq!(decoder.frame().len(), 64 * 48 * 4);

        // Leaving ends the session; the service opens a new one.
        drop(client);
        let mut restarted = false;
        for _ in 0..300 {
            if service.controller().info().is_some_and(|i| i.id != first_id) {
                restarted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(restarted);

        stop.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(service.controller().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn invalid_geometry_stops_the_service() {
        let mut config = small_config();
        config.session.width = 0;
        let service = HostService::new(config).unwrap();
        let err = service.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }
}
