//! Framed message transport.
//!
//! Every frame is a 12-byte little-endian header followed by the payload:
//! sender object-id (u32), destination object-id (u32), event code (u16),
//! payload length (u16). The payload is therefore capped at 65 535 bytes.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Object id of the bus itself.
pub const BUS_OBJECT_ID: u32 = 0;

// Reserved event codes on object 0.
pub const EVENT_ERROR: u16 = 0;
pub const EVENT_REPLY: u16 = 1;
pub const EVENT_REGISTER: u16 = 2;
pub const EVENT_UNREGISTER: u16 = 3;
pub const EVENT_PING: u16 = 4;

pub const HEADER_SIZE: usize = 12;

/// System bus socket path.
pub const SYSTEM_BUS_PATH: &str = "/cache/runtime/bus.sock";

/// Session bus socket path: `$HOME/.cache/bus.sock`.
pub fn session_bus_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".cache/bus.sock")
}

/// A single bus frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub sender: u32,
    pub destination: u32,
    pub event: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection before the next frame.
    #[error("connection closed")]
    Closed,

    #[error("truncated header: got {0} of {HEADER_SIZE} bytes")]
    ShortHeader(usize),

    #[error("payload exceeds 65535 bytes: {0}")]
    PayloadTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one frame. A clean close before the first header byte is
/// [`FrameError::Closed`]; any other short read is a framing error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(FrameError::Closed);
            }
            return Err(FrameError::ShortHeader(filled));
        }
        filled += n;
    }

    let sender = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let destination = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let event = u16::from_le_bytes([header[8], header[9]]);
    let len = u16::from_le_bytes([header[10], header[11]]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Message {
        sender,
        destination,
        event,
        payload,
    })
}

/// Write one frame. Header and payload go out in a single write.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if message.payload.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge(message.payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + message.payload.len());
    buf.extend_from_slice(&message.sender.to_le_bytes());
    buf.extend_from_slice(&message.destination.to_le_bytes());
    buf.extend_from_slice(&message.event.to_le_bytes());
    buf.extend_from_slice(&(message.payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(&message.payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let original = Message {
            sender: 0xdead_beef,
            destination: 7,
            event: 42,
            payload: b"hello".to_vec(),
        };
        write_frame(&mut a, &original).await.unwrap();

        let read = read_frame(&mut b).await.unwrap();
        assert_eq!(read, original);
    }

    #[tokio::test]
    async fn empty_payload_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let original = Message {
            sender: 1,
            destination: 2,
            event: 3,
            payload: Vec::new(),
        };
        write_frame(&mut a, &original).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), original);
    }

    #[tokio::test]
    async fn header_is_little_endian() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let message = Message {
            sender: 0x0102_0304,
            destination: 0x0506_0708,
            event: 0x090a,
            payload: vec![0xff],
        };
        write_frame(&mut a, &message).await.unwrap();
        drop(a);

        let mut raw = Vec::new();
        b.read_to_end(&mut raw).await.unwrap();
        assert_eq!(
            raw,
            vec![0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05, 0x0a, 0x09, 0x01, 0x00, 0xff]
        );
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected() {
        let (mut a, _b) = tokio::io::duplex(64);

        let message = Message {
            payload: vec![0u8; u16::MAX as usize + 1],
            ..Default::default()
        };
        let err = write_frame(&mut a, &message).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn clean_close_reads_as_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn truncated_header_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[1, 2, 3, 4, 5]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::ShortHeader(5)));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);

        // Header promising 8 payload bytes, but only 3 arrive.
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&3u16.to_le_bytes());
        raw.extend_from_slice(&8u16.to_le_bytes());
        raw.extend_from_slice(&[9, 9, 9]);
        a.write_all(&raw).await.unwrap();
        drop(a);

        assert!(read_frame(&mut b).await.is_err());
    }
}
