//! Viewer-side connection: pairing, handshake, video in, input out.

use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::error::LinkError;
use crate::transport::codec::{Inbound, MAX_PAYLOAD_SIZE};
use crate::transport::{pairing, Handshake, InputMessage, ViewerCodec};
use crate::types::{EncodedUnit, InputEvent};

type ViewerFramed = Framed<TcpStream, ViewerCodec>;

/// A connected viewer.
pub struct ViewerClient {
    framed: ViewerFramed,
    handshake: Handshake,
    peer: SocketAddr,
}

impl std::fmt::Debug for ViewerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerClient")
            .field("handshake", &self.handshake)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ViewerClient {
    /// Connect, answer the PIN prompt when `pin` is given, and read the
    /// handshake. `wait` bounds each of connect and handshake.
    pub async fn connect(
        addr: SocketAddr,
        pin: Option<&str>,
        wait: Duration,
    ) -> Result<Self, LinkError> {
        let mut stream = tokio::time::timeout(wait, TcpStream::connect(addr))
            .await
            .map_err(|_| LinkError::Timeout(wait))??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        if let Some(pin) = pin {
            tokio::time::timeout(wait, pairing::respond(&mut stream, pin))
                .await
                .map_err(|_| LinkError::Timeout(wait))??;
            debug!(%peer, "PIN sent");
        }

        let mut framed = Framed::new(stream, ViewerCodec::new(MAX_PAYLOAD_SIZE));
        let first = tokio::time::timeout(wait, framed.next())
            .await
            .map_err(|_| LinkError::Timeout(wait))?;
        let handshake = match first {
            Some(Ok(Inbound::Handshake(hs))) => hs,
            Some(Ok(Inbound::Video(_))) => {
                return Err(LinkError::Other("video before handshake".into()));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(closed()),
        };
        info!(
            %peer,
            width = handshake.width,
            height = handshake.height,
            codec = ?handshake.codec,
            "connected to host"
        );
        Ok(Self {
            framed,
            handshake,
            peer,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Next video unit; `None` once the host closes the connection.
    pub async fn next_unit(&mut self) -> Result<Option<EncodedUnit>, LinkError> {
        next_unit(&mut self.framed).await
    }

    pub async fn send_input(&mut self, event: &InputEvent) -> Result<(), LinkError> {
        self.framed.send(InputMessage::from(event)).await
    }

    pub async fn send_keepalive(&mut self) -> Result<(), LinkError> {
        self.framed.send(InputMessage::keepalive()).await
    }

    /// Separate halves for concurrent reading and writing.
    pub fn split(self) -> (UnitStream, InputWriter) {
        let (sink, stream) = self.framed.split();
        (UnitStream { inner: stream }, InputWriter { inner: sink })
    }
}

/// Read half of a [`ViewerClient`].
pub struct UnitStream {
    inner: SplitStream<ViewerFramed>,
}

impl UnitStream {
    pub async fn next_unit(&mut self) -> Result<Option<EncodedUnit>, LinkError> {
        next_unit(&mut self.inner).await
    }
}

/// Write half of a [`ViewerClient`].
pub struct InputWriter {
    inner: SplitSink<ViewerFramed, InputMessage>,
}

impl InputWriter {
    pub async fn send_input(&mut self, event: &InputEvent) -> Result<(), LinkError> {
        self.inner.send(InputMessage::from(event)).await
    }

    pub async fn send_keepalive(&mut self) -> Result<(), LinkError> {
        self.inner.send(InputMessage::keepalive()).await
    }

    /// Flush and half-close the connection.
    pub async fn close(mut self) -> Result<(), LinkError> {
        self.inner.close().await
    }
}

async fn next_unit<S>(stream: &mut S) -> Result<Option<EncodedUnit>, LinkError>
where
    S: Stream<Item = Result<Inbound, LinkError>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Inbound::Video(unit))) => Ok(Some(unit)),
        Some(Ok(Inbound::Handshake(_))) => Err(LinkError::Other("unexpected second handshake".into())),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

fn closed() -> LinkError {
    LinkError::Connection(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "host closed the connection",
    ))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::codec::Outbound;
    use crate::transport::ServerCodec;
    use crate::types::{CodecId, InputKind, UnitFlags};
    use bytes::Bytes;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn reads_handshake_and_units_and_writes_input() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(sock, ServerCodec::default());
            framed
                .send(Outbound::Handshake(Handshake {
                    width: 64,
                    height: 48,
                    codec: CodecId::ZstdTiles,
                    bitrate: 1000,
                }))
                .await
                .unwrap();
            framed
                .send(Outbound::Video(EncodedUnit {
                    sequence: 0,
                    pts_us: 0,
                    flags: UnitFlags::KEY_FRAME,
                    payload: Bytes::from_static(b"k"),
                }))
                .await
                .unwrap();
            let first = framed.next().await.unwrap().unwrap();
            let second = framed.next().await.unwrap().unwrap();
            (first, second)
        });

        let mut client = ViewerClient::connect(addr, None, WAIT).await.unwrap();
        assert_eq!(client.handshake().width, 64);
        let unit = client.next_unit().await.unwrap().unwrap();
        assert!(unit.is_key_frame());

        client.send_keepalive().await.unwrap();
        client
            .send_input(&InputEvent::pointer(InputKind::PointerDown, 5, 6))
            .await
            .unwrap();

        let (first, second) = host.await.unwrap();
        assert!(first.is_keepalive());
        assert_eq!((second.kind, second.x, second.y), (InputKind::PointerDown as u8, 5, 6));
        assert_eq!(client.next_unit().await.unwrap(), None);
    }

    #[tokio::test]
    async fn answers_pin_prompt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let verdict = pairing::challenge(&mut sock, "4321").await;
            let mut framed = Framed::new(sock, ServerCodec::default());
            if verdict.is_ok() {
                framed
                    .send(Outbound::Handshake(Handshake {
                        width: 8,
                        height: 8,
                        codec: CodecId::Avc,
                        bitrate: 1,
                    }))
                    .await
                    .unwrap();
            }
            verdict
        });

        let client = ViewerClient::connect(addr, Some("4321"), WAIT).await.unwrap();
        assert_eq!(client.handshake().codec, CodecId::Avc);
        host.await.unwrap().unwrap();
    }
}
