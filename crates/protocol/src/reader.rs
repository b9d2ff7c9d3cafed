//! Async wire reader: one opcode byte, then exactly the fixed payload
//! length from the opcode table.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};
use crate::packet::{Opcode, Packet, decode_payload};

/// Read one packet. Blocks until the opcode's full fixed byte count is
/// available; if the transport closes first this fails with
/// [`ProtocolError::TruncatedStream`].
pub async fn read_packet<R>(read: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut opcode_byte = [0u8; 1];
    read.read_exact(&mut opcode_byte).await?;
    read_packet_after_opcode(read, opcode_byte[0]).await
}

/// Complete a packet whose opcode byte has already been consumed.
///
/// Session loops that poll for inbound traffic under a timeout must
/// take this split: a one-byte opcode read can be dropped without
/// losing data, but a dropped multi-byte read abandons whatever it
/// already pulled off the stream and desyncs the framing. Poll the
/// opcode byte cancellably, then finish the fixed-length payload here
/// without a timeout.
pub async fn read_packet_after_opcode<R>(read: &mut R, opcode_byte: u8) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let opcode = Opcode::from_u8(opcode_byte).ok_or(ProtocolError::UnknownOpcode(opcode_byte))?;

    let payload_len = opcode.packet_len() - 1;
    let mut payload = vec![0u8; payload_len];
    read.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::TruncatedStream {
                opcode: opcode as u8,
                expected: payload_len,
            }
        } else {
            ProtocolError::Io(e)
        }
    })?;

    Ok(decode_payload(opcode, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn truncated_packet_is_detected() {
        // Teleport is 10 bytes total; provide only 4.
        let bytes = [0x08u8, 0x00, 0x01, 0x02];
        let mut cursor = std::io::Cursor::new(&bytes[..]);
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedStream { opcode: 0x08, expected: 9 }
        ));
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let bytes = [0xFFu8];
        let mut cursor = std::io::Cursor::new(&bytes[..]);
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownOpcode(0xFF)));
    }

    #[tokio::test]
    async fn payload_completes_after_a_separate_opcode_read() {
        let bytes = Packet::UserType { user_type: 0x64 }.encode();
        let mut cursor = std::io::Cursor::new(&bytes[1..]);
        let packet = read_packet_after_opcode(&mut cursor, bytes[0]).await.unwrap();
        assert_eq!(packet, Packet::UserType { user_type: 0x64 });
    }
}
