//! Wire protocol for the classic voxel game: fixed-size binary packets,
//! big-endian integers, 64-byte space-padded ASCII strings.
//!
//! Everything here is pure and transport-agnostic except [`reader`],
//! which decodes packets from any `tokio::io::AsyncRead`.

pub mod error;
pub mod packet;
pub mod reader;
pub mod text;
pub mod types;

pub use error::{ProtocolError, Result};
pub use packet::{Opcode, Packet};
pub use reader::{read_packet, read_packet_after_opcode};
pub use types::Position;

/// Protocol version carried in the handshake. Anything else is rejected.
pub const PROTOCOL_VERSION: u8 = 7;

/// Handshake pad byte signalling that the client speaks the
/// capability-negotiation extension.
pub const EXTENSION_MAGIC: u8 = 0x42;

/// Fixed width of every wire string field, in bytes.
pub const STRING_LEN: usize = 64;

/// Payload bytes carried by one world-transfer chunk.
pub const LEVEL_CHUNK_LEN: usize = 1024;
