//! Packet header codec and the async framer.
//!
//! Every packet is a 16-byte little-endian header (`type, source, stream_id,
//! size`) followed by exactly `size` payload bytes.  The only packet type
//! allowed to carry a zero-size payload is STREAM_UNREGISTER; a zero size on
//! any other type is a protocol error.  A short payload read means the
//! connection is broken.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::enums::MessageType;
use crate::wire::WireError;

pub const HEADER_SIZE: usize = 16;

/// A framed packet.  The wire `size` field is implied by the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MessageType,
    pub source: u32,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: MessageType, source: u32, stream_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            source,
            stream_id,
            payload,
        }
    }

    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Header and payload as one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32_le(self.kind.code());
        buf.put_u32_le(self.source);
        buf.put_u32_le(self.stream_id);
        buf.put_u32_le(self.size());
        buf.put_slice(&self.payload);
        buf.to_vec()
    }
}

/// Read the next packet: exactly 16 header bytes, then exactly `size`
/// payload bytes.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let mut buf = &header[..];
    let kind = MessageType::try_from(buf.get_u32_le())?;
    let source = buf.get_u32_le();
    let stream_id = buf.get_u32_le();
    let size = buf.get_u32_le() as usize;

    if size == 0 && kind != MessageType::StreamUnregister {
        return Err(WireError::EmptyPayload { kind });
    }

    let mut payload = vec![0u8; size];
    // read_exact fails with UnexpectedEof on a short read, which callers
    // treat as a broken connection.
    reader.read_exact(&mut payload).await?;

    Ok(Packet {
        kind,
        source,
        stream_id,
        payload,
    })
}

/// Write a packet as one contiguous header + payload write and flush it.
///
/// Callers serialize access with a writer mutex so two tasks cannot
/// interleave a packet's bytes.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packet_round_trip_preserves_header_and_payload() {
        let packet = Packet::new(MessageType::Chat, 7, 10, b"hello".to_vec());
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_packet(&mut client, &packet).await.unwrap();
        let read = read_packet(&mut server).await.unwrap();

        assert_eq!(read, packet);
        assert_eq!(read.size(), 5);
    }

    #[tokio::test]
    async fn zero_size_is_only_legal_for_stream_unregister() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let unregister = Packet::new(MessageType::StreamUnregister, 7, 11, Vec::new());
        write_packet(&mut client, &unregister).await.unwrap();
        assert_eq!(read_packet(&mut server).await.unwrap(), unregister);

        let empty_chat = Packet::new(MessageType::Chat, 7, 10, Vec::new());
        write_packet(&mut client, &empty_chat).await.unwrap();
        assert!(matches!(
            read_packet(&mut server).await,
            Err(WireError::EmptyPayload {
                kind: MessageType::Chat
            })
        ));
    }

    #[tokio::test]
    async fn unknown_type_code_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&9999u32.to_le_bytes());
        header.extend_from_slice(&[0u8; 12]);
        client.write_all(&header).await.unwrap();

        assert!(matches!(
            read_packet(&mut server).await,
            Err(WireError::UnknownMessageType(9999))
        ));
    }

    #[tokio::test]
    async fn short_payload_breaks_the_connection() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut bytes = Packet::new(MessageType::Chat, 1, 2, b"hello".to_vec()).encode();
        bytes.truncate(HEADER_SIZE + 2);
        client.write_all(&bytes).await.unwrap();
        drop(client);

        assert!(matches!(
            read_packet(&mut server).await,
            Err(WireError::Io(_))
        ));
    }
}
