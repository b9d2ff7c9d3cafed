//! Typed errors for the wire codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport closed before the opcode's full fixed length arrived.
    #[error("stream closed mid-packet (opcode 0x{opcode:02x}, expected {expected} payload bytes)")]
    TruncatedStream { opcode: u8, expected: usize },

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Transport failures (reset, EOF between packets) are normal
    /// disconnects; everything else is a protocol violation.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
