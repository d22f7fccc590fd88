//! Wire format for the viewer connection.
//!
//! All integers are little-endian.
//!
//! **Handshake** (server → viewer, once, 16 bytes):
//! ```text
//! width:    u32
//! height:   u32
//! codec_id: u32
//! bitrate:  u32
//! ```
//!
//! **Video message** (server → viewer, 21 byte header + payload):
//! ```text
//! sequence:     u64
//! timestamp_us: u64
//! flags:        u8   (bit 0 = key-frame)
//! payload_len:  u32
//! payload:      [u8; payload_len]
//! ```
//!
//! **Input message** (viewer → server, 17 bytes):
//! ```text
//! kind:        u8   (0..=4, 0xFF keepalive)
//! x:           i32
//! y:           i32
//! key_code:    i32
//! action_code: i32
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LinkError;
use crate::types::{CodecId, EncodedUnit, InputEvent, InputKind, UnitFlags};

/// Largest video payload either side accepts (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Inbound kind that only refreshes the read deadline.
pub const KEEPALIVE: u8 = 0xFF;

// ── Handshake ────────────────────────────────────────────────────

/// Stream parameters sent right after the connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub width: u32,
    pub height: u32,
    pub codec: CodecId,
    pub bitrate: u32,
}

impl Handshake {
    pub const SIZE: usize = 16;

    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(Self::SIZE);
        dst.put_u32_le(self.width);
        dst.put_u32_le(self.height);
        dst.put_u32_le(self.codec as u32);
        dst.put_u32_le(self.bitrate);
    }

    /// Parse exactly [`Self::SIZE`] bytes.
    pub fn read(mut src: &[u8]) -> Result<Self, LinkError> {
        if src.len() != Self::SIZE {
            return Err(LinkError::MalformedMessage {
                expected: Self::SIZE,
                actual: src.len(),
            });
        }
        let width = src.get_u32_le();
        let height = src.get_u32_le();
        let codec = CodecId::try_from(src.get_u32_le())?;
        let bitrate = src.get_u32_le();
        Ok(Self {
            width,
            height,
            codec,
            bitrate,
        })
    }
}

// ── VideoHeader ──────────────────────────────────────────────────

/// Fixed prefix of every video message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub flags: UnitFlags,
    pub payload_len: u32,
}

impl VideoHeader {
    pub const SIZE: usize = 21;

    fn peek(src: &[u8]) -> Self {
        let mut src = &src[..Self::SIZE];
        Self {
            sequence: src.get_u64_le(),
            timestamp_us: src.get_u64_le(),
            // Unknown bits are ignored.
            flags: UnitFlags::from_bits_truncate(src.get_u8()),
            payload_len: src.get_u32_le(),
        }
    }
}

fn write_video(unit: &EncodedUnit, max: usize, dst: &mut BytesMut) -> Result<(), LinkError> {
    if unit.payload.len() > max {
        return Err(LinkError::PayloadTooLarge {
            size: unit.payload.len(),
            max,
        });
    }
    dst.reserve(VideoHeader::SIZE + unit.payload.len());
    dst.put_u64_le(unit.sequence);
    dst.put_u64_le(unit.pts_us);
    dst.put_u8(unit.flags.bits());
    dst.put_u32_le(unit.payload.len() as u32);
    dst.extend_from_slice(&unit.payload);
    Ok(())
}

fn read_video(src: &mut BytesMut, max: usize) -> Result<Option<EncodedUnit>, LinkError> {
    if src.len() < VideoHeader::SIZE {
        return Ok(None);
    }
    let header = VideoHeader::peek(src);
    let len = header.payload_len as usize;
    if len > max {
        return Err(LinkError::PayloadTooLarge { size: len, max });
    }
    if src.len() < VideoHeader::SIZE + len {
        src.reserve(VideoHeader::SIZE + len - src.len());
        return Ok(None);
    }
    src.advance(VideoHeader::SIZE);
    let payload = src.split_to(len).freeze();
    Ok(Some(EncodedUnit {
        sequence: header.sequence,
        pts_us: header.timestamp_us,
        flags: header.flags,
        payload,
    }))
}

// ── InputMessage ─────────────────────────────────────────────────

/// One fixed-size inbound message, kind not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMessage {
    pub kind: u8,
    pub x: i32,
    pub y: i32,
    pub key_code: i32,
    pub action_code: i32,
}

impl InputMessage {
    pub const SIZE: usize = 17;

    pub fn keepalive() -> Self {
        Self {
            kind: KEEPALIVE,
            x: 0,
            y: 0,
            key_code: 0,
            action_code: 0,
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.kind == KEEPALIVE
    }

    /// Typed event; `Ok(None)` for keepalives.
    pub fn into_event(self) -> Result<Option<InputEvent>, LinkError> {
        if self.is_keepalive() {
            return Ok(None);
        }
        let kind = InputKind::try_from(self.kind)?;
        Ok(Some(InputEvent::new(
            kind,
            self.x,
            self.y,
            self.key_code,
            self.action_code,
        )))
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.reserve(Self::SIZE);
        dst.put_u8(self.kind);
        dst.put_i32_le(self.x);
        dst.put_i32_le(self.y);
        dst.put_i32_le(self.key_code);
        dst.put_i32_le(self.action_code);
    }

    fn read(src: &mut BytesMut) -> Self {
        let mut buf = src.split_to(Self::SIZE);
        Self {
            kind: buf.get_u8(),
            x: buf.get_i32_le(),
            y: buf.get_i32_le(),
            key_code: buf.get_i32_le(),
            action_code: buf.get_i32_le(),
        }
    }
}

impl From<&InputEvent> for InputMessage {
    fn from(ev: &InputEvent) -> Self {
        Self {
            kind: ev.kind as u8,
            x: ev.x,
            y: ev.y,
            key_code: ev.key_code,
            action_code: ev.action_code,
        }
    }
}

// ── ServerCodec ──────────────────────────────────────────────────

/// Messages the server writes.
#[derive(Debug, Clone)]
pub enum Outbound {
    Handshake(Handshake),
    Video(EncodedUnit),
}

/// Server side: writes [`Outbound`], reads [`InputMessage`].
#[derive(Debug, Clone)]
pub struct ServerCodec {
    max_payload: usize,
}

impl ServerCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Encoder<Outbound> for ServerCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Outbound::Handshake(hs) => {
                hs.write(dst);
                Ok(())
            }
            Outbound::Video(unit) => write_video(&unit, self.max_payload, dst),
        }
    }
}

impl Decoder for ServerCodec {
    type Item = InputMessage;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < InputMessage::SIZE {
            return Ok(None);
        }
        Ok(Some(InputMessage::read(src)))
    }

    /// A stream ending mid-message is malformed, not a clean close.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(LinkError::MalformedMessage {
                expected: InputMessage::SIZE,
                actual: src.len(),
            }),
        }
    }
}

// ── ViewerCodec ──────────────────────────────────────────────────

/// Messages the viewer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Handshake(Handshake),
    Video(EncodedUnit),
}

/// Viewer side: reads one handshake then video, writes input.
#[derive(Debug, Clone)]
pub struct ViewerCodec {
    max_payload: usize,
    handshake_seen: bool,
}

impl ViewerCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            handshake_seen: false,
        }
    }
}

impl Default for ViewerCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for ViewerCodec {
    type Item = Inbound;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.handshake_seen {
            if src.len() < Handshake::SIZE {
                return Ok(None);
            }
            let raw = src.split_to(Handshake::SIZE);
            let hs = Handshake::read(&raw)?;
            self.handshake_seen = true;
            return Ok(Some(Inbound::Handshake(hs)));
        }
        Ok(read_video(src, self.max_payload)?.map(Inbound::Video))
    }
}

impl Encoder<InputMessage> for ViewerCodec {
    type Error = LinkError;

    fn encode(&mut self, item: InputMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write(dst);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn unit(seq: u64, key: bool, payload: &'static [u8]) -> EncodedUnit {
        EncodedUnit {
            sequence: seq,
            pts_us: seq * 33_333,
            flags: if key { UnitFlags::KEY_FRAME } else { UnitFlags::empty() },
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn handshake_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        Handshake {
            width: 1280,
            height: 720,
            codec: CodecId::ZstdTiles,
            bitrate: 5_000_000,
        }
        .write(&mut buf);
        assert_eq!(buf.len(), Handshake::SIZE);
        assert_eq!(&buf[0..4], &1280u32.to_le_bytes());
        assert_eq!(&buf[4..8], &720u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());
        assert_eq!(&buf[12..16], &5_000_000u32.to_le_bytes());
    }

    #[test]
    fn video_header_layout() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Outbound::Video(unit(7, true, b"abc")), &mut buf)
            .unwrap();
        assert_eq!(buf.len(), VideoHeader::SIZE + 3);
        assert_eq!(&buf[0..8], &7u64.to_le_bytes());
        assert_eq!(&buf[8..16], &(7u64 * 33_333).to_le_bytes());
        assert_eq!(buf[16], 1);
        assert_eq!(&buf[17..21], &3u32.to_le_bytes());
        assert_eq!(&buf[21..], b"abc");
    }

    #[test]
    fn viewer_reads_handshake_then_video_in_pieces() {
        let mut server = ServerCodec::default();
        let mut wire = BytesMut::new();
        let hs = Handshake {
            width: 8,
            height: 8,
            codec: CodecId::Avc,
            bitrate: 1,
        };
        server.encode(Outbound::Handshake(hs), &mut wire).unwrap();
        server
            .encode(Outbound::Video(unit(0, true, b"key")), &mut wire)
            .unwrap();

        let mut viewer = ViewerCodec::default();
        let mut partial = wire.split_to(20);
        assert_eq!(viewer.decode(&mut partial).unwrap(), Some(Inbound::Handshake(hs)));
        assert_eq!(viewer.decode(&mut partial).unwrap(), None);
        partial.unsplit(wire);
        match viewer.decode(&mut partial).unwrap() {
            Some(Inbound::Video(u)) => {
                assert!(u.is_key_frame());
                assert_eq!(&u.payload[..], b"key");
            }
            other => panic!("expected video, got {other:?}"),
        }
        assert!(partial.is_empty());
    }

    #[test]
    fn oversized_payload_rejected_both_ways() {
        let mut server = ServerCodec::new(4);
        let mut buf = BytesMut::new();
        assert!(matches!(
            server.encode(Outbound::Video(unit(0, true, b"too long")), &mut buf),
            Err(LinkError::PayloadTooLarge { size: 8, max: 4 })
        ));

        let mut viewer = ViewerCodec::new(4);
        viewer.handshake_seen = true;
        let mut wire = BytesMut::new();
        ServerCodec::default()
            .encode(Outbound::Video(unit(0, true, b"too long")), &mut wire)
            .unwrap();
        assert!(viewer.decode(&mut wire).is_err());
    }

    #[test]
    fn input_message_roundtrip_and_keepalive() {
        let mut viewer = ViewerCodec::default();
        let mut server = ServerCodec::default();
        let mut wire = BytesMut::new();
        let msg = InputMessage {
            kind: InputKind::PointerMove as u8,
            x: -5,
            y: 2000,
            key_code: 0,
            action_code: 1,
        };
        viewer.encode(msg, &mut wire).unwrap();
        viewer.encode(InputMessage::keepalive(), &mut wire).unwrap();
        assert_eq!(wire.len(), 2 * InputMessage::SIZE);
        assert_eq!(&wire[1..5], &(-5i32).to_le_bytes());

        let first = server.decode(&mut wire).unwrap().unwrap();
        let ev = first.into_event().unwrap().unwrap();
        assert_eq!(ev.kind, InputKind::PointerMove);
        assert_eq!((ev.x, ev.y), (-5, 2000));

        let second = server.decode(&mut wire).unwrap().unwrap();
        assert!(second.into_event().unwrap().is_none());
    }

    #[test]
    fn unknown_kind_is_reported() {
        let msg = InputMessage {
            kind: 9,
            ..InputMessage::keepalive()
        };
        assert!(matches!(
            msg.into_event(),
            Err(LinkError::UnknownVariant { value: 9, .. })
        ));
    }

    #[test]
    fn truncated_input_at_eof_is_malformed() {
        let mut server = ServerCodec::default();
        let mut wire = BytesMut::from(&[1u8, 2, 3, 4, 5][..]);
        assert!(server.decode(&mut wire).unwrap().is_none());
        assert!(matches!(
            server.decode_eof(&mut wire),
            Err(LinkError::MalformedMessage {
                expected: 17,
                actual: 5
            })
        ));
        assert!(server.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }
}
