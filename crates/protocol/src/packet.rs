//! Packet definitions and the encoder.
//!
//! Every opcode has a fixed total length (opcode byte included) given
//! by a static table; packets are never self-describing beyond their
//! opcode. Multi-byte integers are big-endian, strings are 64-byte
//! space-padded ASCII fields.

use crate::types::{Position, encode_string};
use crate::{LEVEL_CHUNK_LEN, STRING_LEN};

/// One-byte tag identifying a packet's semantic type and, via
/// [`Opcode::packet_len`], its exact wire length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Identification = 0x00,
    Ping = 0x01,
    LevelInitialize = 0x02,
    LevelDataChunk = 0x03,
    LevelFinalize = 0x04,
    SetBlockClient = 0x05,
    SetBlockServer = 0x06,
    SpawnEntity = 0x07,
    Teleport = 0x08,
    PositionOrientationDelta = 0x09,
    PositionDelta = 0x0a,
    OrientationDelta = 0x0b,
    DespawnEntity = 0x0c,
    Message = 0x0d,
    Disconnect = 0x0e,
    UserType = 0x0f,
    // Capability-negotiation sub-range.
    ExtInfo = 0x10,
    ExtEntry = 0x11,
    CustomBlockSupportLevel = 0x13,
    BlockPermission = 0x1c,
    TwoWayPing = 0x2b,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0x00 => Opcode::Identification,
            0x01 => Opcode::Ping,
            0x02 => Opcode::LevelInitialize,
            0x03 => Opcode::LevelDataChunk,
            0x04 => Opcode::LevelFinalize,
            0x05 => Opcode::SetBlockClient,
            0x06 => Opcode::SetBlockServer,
            0x07 => Opcode::SpawnEntity,
            0x08 => Opcode::Teleport,
            0x09 => Opcode::PositionOrientationDelta,
            0x0a => Opcode::PositionDelta,
            0x0b => Opcode::OrientationDelta,
            0x0c => Opcode::DespawnEntity,
            0x0d => Opcode::Message,
            0x0e => Opcode::Disconnect,
            0x0f => Opcode::UserType,
            0x10 => Opcode::ExtInfo,
            0x11 => Opcode::ExtEntry,
            0x13 => Opcode::CustomBlockSupportLevel,
            0x1c => Opcode::BlockPermission,
            0x2b => Opcode::TwoWayPing,
            _ => return None,
        })
    }

    /// Total wire length of a packet with this opcode, opcode byte
    /// included.
    pub const fn packet_len(self) -> usize {
        match self {
            Opcode::Identification => 131,
            Opcode::Ping => 1,
            Opcode::LevelInitialize => 1,
            Opcode::LevelDataChunk => 1028,
            Opcode::LevelFinalize => 7,
            Opcode::SetBlockClient => 9,
            Opcode::SetBlockServer => 8,
            Opcode::SpawnEntity => 74,
            Opcode::Teleport => 10,
            Opcode::PositionOrientationDelta => 7,
            Opcode::PositionDelta => 5,
            Opcode::OrientationDelta => 4,
            Opcode::DespawnEntity => 2,
            Opcode::Message => 66,
            Opcode::Disconnect => 65,
            Opcode::UserType => 2,
            Opcode::ExtInfo => 67,
            Opcode::ExtEntry => 69,
            Opcode::CustomBlockSupportLevel => 2,
            Opcode::BlockPermission => 4,
            Opcode::TwoWayPing => 4,
        }
    }
}

/// A decoded (or to-be-encoded) protocol packet.
///
/// Constructed immutably, consumed once by either the wire writer or
/// a dispatch match. The same opcode space is used in both directions;
/// only `SetBlockClient`/`SetBlockServer` differ per direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Handshake. Client: name + verification token. Server: server
    /// name + MOTD. `pad` carries the extension magic or the user type.
    Identification {
        version: u8,
        name: String,
        detail: String,
        pad: u8,
    },
    Ping,
    LevelInitialize,
    LevelDataChunk {
        len: u16,
        data: Box<[u8; LEVEL_CHUNK_LEN]>,
        percent: u8,
    },
    LevelFinalize {
        width: i16,
        height: i16,
        length: i16,
    },
    SetBlockClient {
        x: i16,
        y: i16,
        z: i16,
        mode: u8,
        block: u8,
    },
    SetBlockServer {
        x: i16,
        y: i16,
        z: i16,
        block: u8,
    },
    SpawnEntity {
        id: i8,
        name: String,
        pos: Position,
    },
    Teleport {
        id: i8,
        pos: Position,
    },
    PositionOrientationDelta {
        id: i8,
        dx: i8,
        dy: i8,
        dz: i8,
        yaw: u8,
        pitch: u8,
    },
    PositionDelta {
        id: i8,
        dx: i8,
        dy: i8,
        dz: i8,
    },
    OrientationDelta {
        id: i8,
        yaw: u8,
        pitch: u8,
    },
    DespawnEntity {
        id: i8,
    },
    Message {
        id: i8,
        text: String,
    },
    Disconnect {
        reason: String,
    },
    UserType {
        user_type: u8,
    },
    ExtInfo {
        app_name: String,
        count: u16,
    },
    ExtEntry {
        name: String,
        version: u32,
    },
    CustomBlockSupportLevel {
        level: u8,
    },
    BlockPermission {
        block: u8,
        allow_place: bool,
        allow_delete: bool,
    },
    TwoWayPing {
        server_to_client: bool,
        data: u16,
    },
}

impl Packet {
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Identification { .. } => Opcode::Identification,
            Packet::Ping => Opcode::Ping,
            Packet::LevelInitialize => Opcode::LevelInitialize,
            Packet::LevelDataChunk { .. } => Opcode::LevelDataChunk,
            Packet::LevelFinalize { .. } => Opcode::LevelFinalize,
            Packet::SetBlockClient { .. } => Opcode::SetBlockClient,
            Packet::SetBlockServer { .. } => Opcode::SetBlockServer,
            Packet::SpawnEntity { .. } => Opcode::SpawnEntity,
            Packet::Teleport { .. } => Opcode::Teleport,
            Packet::PositionOrientationDelta { .. } => Opcode::PositionOrientationDelta,
            Packet::PositionDelta { .. } => Opcode::PositionDelta,
            Packet::OrientationDelta { .. } => Opcode::OrientationDelta,
            Packet::DespawnEntity { .. } => Opcode::DespawnEntity,
            Packet::Message { .. } => Opcode::Message,
            Packet::Disconnect { .. } => Opcode::Disconnect,
            Packet::UserType { .. } => Opcode::UserType,
            Packet::ExtInfo { .. } => Opcode::ExtInfo,
            Packet::ExtEntry { .. } => Opcode::ExtEntry,
            Packet::CustomBlockSupportLevel { .. } => Opcode::CustomBlockSupportLevel,
            Packet::BlockPermission { .. } => Opcode::BlockPermission,
            Packet::TwoWayPing { .. } => Opcode::TwoWayPing,
        }
    }

    /// Encode to wire bytes. Total and deterministic: string fields
    /// truncate at 64 bytes, nothing errors.
    pub fn encode(&self) -> Vec<u8> {
        let opcode = self.opcode();
        let mut out = Vec::with_capacity(opcode.packet_len());
        out.push(opcode as u8);
        match self {
            Packet::Identification { version, name, detail, pad } => {
                out.push(*version);
                out.extend_from_slice(&encode_string(name));
                out.extend_from_slice(&encode_string(detail));
                out.push(*pad);
            }
            Packet::Ping | Packet::LevelInitialize => {}
            Packet::LevelDataChunk { len, data, percent } => {
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(&data[..]);
                out.push(*percent);
            }
            Packet::LevelFinalize { width, height, length } => {
                out.extend_from_slice(&width.to_be_bytes());
                out.extend_from_slice(&height.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
            }
            Packet::SetBlockClient { x, y, z, mode, block } => {
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
                out.extend_from_slice(&z.to_be_bytes());
                out.push(*mode);
                out.push(*block);
            }
            Packet::SetBlockServer { x, y, z, block } => {
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
                out.extend_from_slice(&z.to_be_bytes());
                out.push(*block);
            }
            Packet::SpawnEntity { id, name, pos } => {
                out.push(*id as u8);
                out.extend_from_slice(&encode_string(name));
                push_position(&mut out, pos);
            }
            Packet::Teleport { id, pos } => {
                out.push(*id as u8);
                push_position(&mut out, pos);
            }
            Packet::PositionOrientationDelta { id, dx, dy, dz, yaw, pitch } => {
                out.push(*id as u8);
                out.push(*dx as u8);
                out.push(*dy as u8);
                out.push(*dz as u8);
                out.push(*yaw);
                out.push(*pitch);
            }
            Packet::PositionDelta { id, dx, dy, dz } => {
                out.push(*id as u8);
                out.push(*dx as u8);
                out.push(*dy as u8);
                out.push(*dz as u8);
            }
            Packet::OrientationDelta { id, yaw, pitch } => {
                out.push(*id as u8);
                out.push(*yaw);
                out.push(*pitch);
            }
            Packet::DespawnEntity { id } => {
                out.push(*id as u8);
            }
            Packet::Message { id, text } => {
                out.push(*id as u8);
                out.extend_from_slice(&encode_string(text));
            }
            Packet::Disconnect { reason } => {
                out.extend_from_slice(&encode_string(reason));
            }
            Packet::UserType { user_type } => {
                out.push(*user_type);
            }
            Packet::ExtInfo { app_name, count } => {
                out.extend_from_slice(&encode_string(app_name));
                out.extend_from_slice(&count.to_be_bytes());
            }
            Packet::ExtEntry { name, version } => {
                out.extend_from_slice(&encode_string(name));
                out.extend_from_slice(&version.to_be_bytes());
            }
            Packet::CustomBlockSupportLevel { level } => {
                out.push(*level);
            }
            Packet::BlockPermission { block, allow_place, allow_delete } => {
                out.push(*block);
                out.push(u8::from(*allow_place));
                out.push(u8::from(*allow_delete));
            }
            Packet::TwoWayPing { server_to_client, data } => {
                out.push(u8::from(*server_to_client));
                out.extend_from_slice(&data.to_be_bytes());
            }
        }
        debug_assert_eq!(out.len(), opcode.packet_len());
        out
    }

    /// Build a world-transfer chunk, zero-padding the trailing partial
    /// frame. Stale buffer reuse here breaks certain third-party
    /// clients, so the pad bytes are always explicit zeroes.
    pub fn level_chunk(payload: &[u8], percent: u8) -> Packet {
        debug_assert!(payload.len() <= LEVEL_CHUNK_LEN);
        let mut data = Box::new([0u8; LEVEL_CHUNK_LEN]);
        data[..payload.len()].copy_from_slice(payload);
        Packet::LevelDataChunk {
            len: payload.len() as u16,
            data,
            percent,
        }
    }
}

fn push_position(out: &mut Vec<u8>, pos: &Position) {
    out.extend_from_slice(&pos.x.to_be_bytes());
    out.extend_from_slice(&pos.y.to_be_bytes());
    out.extend_from_slice(&pos.z.to_be_bytes());
    out.push(pos.yaw);
    out.push(pos.pitch);
}

/// Decode a packet from an opcode plus its exact payload bytes.
/// The caller (the wire reader) guarantees
/// `payload.len() == opcode.packet_len() - 1`.
pub(crate) fn decode_payload(opcode: Opcode, payload: &[u8]) -> Packet {
    use crate::types::decode_string;
    debug_assert_eq!(payload.len(), opcode.packet_len() - 1);

    let i16_at = |i: usize| i16::from_be_bytes([payload[i], payload[i + 1]]);
    let u16_at = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);
    let string_at = |i: usize| decode_string(&payload[i..i + STRING_LEN]);
    let position_at = |i: usize| Position {
        x: i16_at(i),
        y: i16_at(i + 2),
        z: i16_at(i + 4),
        yaw: payload[i + 6],
        pitch: payload[i + 7],
    };

    match opcode {
        Opcode::Identification => Packet::Identification {
            version: payload[0],
            name: string_at(1),
            detail: string_at(65),
            pad: payload[129],
        },
        Opcode::Ping => Packet::Ping,
        Opcode::LevelInitialize => Packet::LevelInitialize,
        Opcode::LevelDataChunk => {
            let mut data = Box::new([0u8; LEVEL_CHUNK_LEN]);
            data.copy_from_slice(&payload[2..2 + LEVEL_CHUNK_LEN]);
            Packet::LevelDataChunk {
                len: u16_at(0),
                data,
                percent: payload[2 + LEVEL_CHUNK_LEN],
            }
        }
        Opcode::LevelFinalize => Packet::LevelFinalize {
            width: i16_at(0),
            height: i16_at(2),
            length: i16_at(4),
        },
        Opcode::SetBlockClient => Packet::SetBlockClient {
            x: i16_at(0),
            y: i16_at(2),
            z: i16_at(4),
            mode: payload[6],
            block: payload[7],
        },
        Opcode::SetBlockServer => Packet::SetBlockServer {
            x: i16_at(0),
            y: i16_at(2),
            z: i16_at(4),
            block: payload[6],
        },
        Opcode::SpawnEntity => Packet::SpawnEntity {
            id: payload[0] as i8,
            name: string_at(1),
            pos: position_at(65),
        },
        Opcode::Teleport => Packet::Teleport {
            id: payload[0] as i8,
            pos: position_at(1),
        },
        Opcode::PositionOrientationDelta => Packet::PositionOrientationDelta {
            id: payload[0] as i8,
            dx: payload[1] as i8,
            dy: payload[2] as i8,
            dz: payload[3] as i8,
            yaw: payload[4],
            pitch: payload[5],
        },
        Opcode::PositionDelta => Packet::PositionDelta {
            id: payload[0] as i8,
            dx: payload[1] as i8,
            dy: payload[2] as i8,
            dz: payload[3] as i8,
        },
        Opcode::OrientationDelta => Packet::OrientationDelta {
            id: payload[0] as i8,
            yaw: payload[1],
            pitch: payload[2],
        },
        Opcode::DespawnEntity => Packet::DespawnEntity {
            id: payload[0] as i8,
        },
        Opcode::Message => Packet::Message {
            id: payload[0] as i8,
            text: string_at(1),
        },
        Opcode::Disconnect => Packet::Disconnect {
            reason: string_at(0),
        },
        Opcode::UserType => Packet::UserType {
            user_type: payload[0],
        },
        Opcode::ExtInfo => Packet::ExtInfo {
            app_name: string_at(0),
            count: u16_at(STRING_LEN),
        },
        Opcode::ExtEntry => Packet::ExtEntry {
            name: string_at(0),
            version: u32::from_be_bytes([
                payload[STRING_LEN],
                payload[STRING_LEN + 1],
                payload[STRING_LEN + 2],
                payload[STRING_LEN + 3],
            ]),
        },
        Opcode::CustomBlockSupportLevel => Packet::CustomBlockSupportLevel {
            level: payload[0],
        },
        Opcode::BlockPermission => Packet::BlockPermission {
            block: payload[0],
            allow_place: payload[1] != 0,
            allow_delete: payload[2] != 0,
        },
        Opcode::TwoWayPing => Packet::TwoWayPing {
            server_to_client: payload[0] != 0,
            data: u16_at(1),
        },
    }
}
