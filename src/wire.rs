//! ==============================================================================
//! wire.rs - node <-> leader packet framing
//! ==============================================================================
//!
//! one packet per tcp connection, fire-and-forget. no ack frame exists.
//!
//! ```text
//! ┌──────────────────┬───────────┬─────────┬─────────────────────────────────┐
//! │ length (4 bytes) │ sender u8 │ kind u8 │ payload (SensorReading only)    │
//! │ big-endian u32   │           │ 1 | 2   │ sensor_kind u8 | raw bytes ...  │
//! └──────────────────┴───────────┴─────────┴─────────────────────────────────┘
//! ```
//!
//! the length prefix makes frames self-delimiting, so the raw payload can
//! take any shape per sensor kind without touching the header.
//!
//! ==============================================================================

use crate::domain::{Reading, SensorKind};
use crate::error::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// upper bound on a frame body
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Announce = 1,
    SensorReading = 2,
}

impl TryFrom<u8> for PacketKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketKind::Announce),
            2 => Ok(PacketKind::SensorReading),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Announce,
    SensorReading(Reading),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// device id of the sending node
    pub sender_id: u8,
    pub payload: Payload,
}

impl Packet {
    pub fn announce(sender_id: u8) -> Self {
        Self { sender_id, payload: Payload::Announce }
    }

    pub fn sensor_reading(sender_id: u8, reading: Reading) -> Self {
        Self { sender_id, payload: Payload::SensorReading(reading) }
    }

    pub fn kind(&self) -> PacketKind {
        match self.payload {
            Payload::Announce => PacketKind::Announce,
            Payload::SensorReading(_) => PacketKind::SensorReading,
        }
    }

    /// body length on the wire (everything after the length prefix)
    pub fn body_len(&self) -> usize {
        match &self.payload {
            Payload::Announce => HEADER_LEN,
            Payload::SensorReading(r) => HEADER_LEN + 1 + r.raw.len(),
        }
    }

    /// serialize into a complete frame, length prefix included.
    ///
    /// a body over MAX_FRAME_LEN is refused here rather than dropped by
    /// the reader on the other end.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body_len = self.body_len();
        if body_len > MAX_FRAME_LEN {
            return Err(FrameError::Oversized { len: body_len, max: MAX_FRAME_LEN });
        }

        let mut buf = Vec::with_capacity(LEN_PREFIX + body_len);
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.push(self.sender_id);
        buf.push(self.kind() as u8);
        if let Payload::SensorReading(r) = &self.payload {
            buf.push(r.kind.code());
            buf.extend_from_slice(&r.raw);
        }
        Ok(buf)
    }

    /// decode a frame body (everything after the length prefix)
    pub fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < HEADER_LEN {
            return Err(FrameError::Truncated { needed: HEADER_LEN });
        }
        let sender_id = body[0];
        let payload = match PacketKind::try_from(body[1])? {
            // anything past the header is reserved for future use
            PacketKind::Announce => Payload::Announce,
            PacketKind::SensorReading => {
                let rest = &body[HEADER_LEN..];
                let (&code, raw) = rest
                    .split_first()
                    .ok_or(FrameError::Truncated { needed: HEADER_LEN + 1 })?;
                Payload::SensorReading(Reading::new(SensorKind::from_code(code), raw))
            }
        };
        Ok(Self { sender_id, payload })
    }

    /// decode a complete frame from a buffer
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < LEN_PREFIX {
            return Err(FrameError::Truncated { needed: LEN_PREFIX });
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&frame[..LEN_PREFIX]);
        let len = body_len(prefix)?;
        let body = &frame[LEN_PREFIX..];
        if body.len() < len {
            return Err(FrameError::Truncated { needed: len });
        }
        Self::decode_body(&body[..len])
    }
}

fn body_len(prefix: [u8; 4]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len, max: MAX_FRAME_LEN });
    }
    Ok(len)
}

/// write one framed packet and flush
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    write_frame(writer, &frame).await?;
    Ok(())
}

/// write an already encoded frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// read exactly one framed packet.
///
/// blocks until the full frame arrives; a stream that ends early is a
/// `Truncated` error, never a partial packet.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX];
    read_exact(reader, &mut prefix).await?;
    let len = body_len(prefix)?;

    let mut body = vec![0u8; len];
    read_exact(reader, &mut body).await?;
    Packet::decode_body(&body)
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameError::Truncated { needed: buf.len() })
        }
        Err(e) => Err(e.into()),
    }
}
