//! Connection driver: receive and decode video, send scripted input and
//! keepalives, and report statistics.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use screenlink_core::{CodecId, InputWriter, LinkError, TileDecoder, ViewerClient};

use crate::input::Action;
use crate::stats::StreamStats;

const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// How to run one viewing session.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub pin: Option<String>,
    /// Connect and handshake timeout.
    pub timeout: Duration,
    pub keepalive: Duration,
    /// Disconnect after this long; `None` runs until the host closes.
    pub duration: Option<Duration>,
    /// Sent in order right after the handshake.
    pub actions: Vec<Action>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            pin: None,
            timeout: Duration::from_secs(5),
            keepalive: Duration::from_secs(5),
            duration: None,
            actions: Vec::new(),
        }
    }
}

/// View the stream at `addr` and return what was received.
pub async fn play(addr: SocketAddr, options: PlayOptions) -> Result<StreamStats, LinkError> {
    let client = ViewerClient::connect(addr, options.pin.as_deref(), options.timeout).await?;
    let hs = *client.handshake();
    let (mut units, writer) = client.split();

    let cancel = CancellationToken::new();
    let input_task = tokio::spawn(drive_input(
        writer,
        options.actions,
        options.keepalive,
        cancel.clone(),
    ));

    let mut decoder = (hs.codec == CodecId::ZstdTiles).then(|| TileDecoder::new(hs.width, hs.height));
    if decoder.is_none() {
        info!(codec = ?hs.codec, "no local decoder, counting units only");
    }
    let deadline = options.duration.map(|d| Instant::now() + d);
    let mut stats = StreamStats::default();
    let mut report = tokio::time::interval(REPORT_PERIOD);

    let received: Result<(), LinkError> = async {
        loop {
            let unit = tokio::select! {
                _ = until(deadline) => {
                    info!("duration reached");
                    return Ok(());
                }
                _ = report.tick() => {
                    info!(
                        units = stats.units,
                        keys = stats.key_frames,
                        gaps = stats.gaps,
                        fps = format_args!("{:.1}", stats.fps()),
                        kbps = stats.bits_per_second() / 1000,
                        "stream"
                    );
                    continue;
                }
                r = units.next_unit() => match r? {
                    Some(unit) => unit,
                    None => {
                        info!("host closed the stream");
                        return Ok(());
                    }
                },
            };
            stats.record(&unit);
            if let Some(decoder) = decoder.as_mut() {
                match decoder.decode(&unit.payload) {
                    Ok(summary) => debug!(seq = unit.sequence, ?summary, "decoded"),
                    Err(e) => {
                        stats.decode_errors += 1;
                        warn!(seq = unit.sequence, "decode failed: {e}");
                    }
                }
            }
        }
    }
    .await;

    cancel.cancel();
    let sent = input_task
        .await
        .map_err(|e| LinkError::Other(format!("input task failed: {e}")))?;
    received?;
    sent?;
    Ok(stats)
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn drive_input(
    mut writer: InputWriter,
    actions: Vec<Action>,
    keepalive: Duration,
    cancel: CancellationToken,
) -> Result<(), LinkError> {
    for action in &actions {
        for event in action.events() {
            writer.send_input(&event).await?;
        }
        debug!(?action, "sent");
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => writer.send_keepalive().await?,
        }
    }
    writer.close().await
}

// ── Tests ────────────────────────────────────────────────────────
