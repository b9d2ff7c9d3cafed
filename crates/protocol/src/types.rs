//! Fixed-point coordinates and the 64-byte string field codec.

use crate::STRING_LEN;

/// Wire units per block along each axis.
pub const UNITS_PER_BLOCK: f32 = 32.0;

/// A player position in wire units (1/32 block) plus two orientation
/// bytes. All arithmetic helpers work in block units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub yaw: u8,
    pub pitch: u8,
}

impl Position {
    pub const fn new(x: i16, y: i16, z: i16, yaw: u8, pitch: u8) -> Self {
        Self { x, y, z, yaw, pitch }
    }

    /// Build a position from block coordinates, centered on the block.
    pub fn from_blocks(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: (x * UNITS_PER_BLOCK) as i16,
            y: (y * UNITS_PER_BLOCK) as i16,
            z: (z * UNITS_PER_BLOCK) as i16,
            yaw: 0,
            pitch: 0,
        }
    }

    pub fn block_x(&self) -> f32 {
        self.x as f32 / UNITS_PER_BLOCK
    }

    pub fn block_y(&self) -> f32 {
        self.y as f32 / UNITS_PER_BLOCK
    }

    pub fn block_z(&self) -> f32 {
        self.z as f32 / UNITS_PER_BLOCK
    }

    /// Squared horizontal displacement to `other`, in blocks.
    pub fn horizontal_delta_sq(&self, other: &Position) -> f32 {
        let dx = self.block_x() - other.block_x();
        let dz = self.block_z() - other.block_z();
        dx * dx + dz * dz
    }

    /// Signed vertical displacement to `other`, in blocks.
    pub fn vertical_delta(&self, other: &Position) -> f32 {
        other.block_y() - self.block_y()
    }

    /// Euclidean distance in blocks from this position to the center of
    /// the block at `(bx, by, bz)`.
    pub fn distance_to_block(&self, bx: i16, by: i16, bz: i16) -> f32 {
        let dx = self.block_x() - (bx as f32 + 0.5);
        let dy = self.block_y() - (by as f32 + 0.5);
        let dz = self.block_z() - (bz as f32 + 0.5);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Encode a string into a fixed 64-byte field: ASCII, space-padded,
/// truncated at 64 bytes. Non-ASCII bytes are replaced with `?` so the
/// field is always legal on the wire.
pub fn encode_string(s: &str) -> [u8; STRING_LEN] {
    let mut out = [b' '; STRING_LEN];
    for (slot, b) in out.iter_mut().zip(s.bytes()) {
        *slot = if b.is_ascii() && !b.is_ascii_control() { b } else { b'?' };
    }
    out
}

/// Decode a fixed 64-byte field, trimming trailing whitespace.
pub fn decode_string(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    field[..end].iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_field_pads_and_trims() {
        let field = encode_string("Bob");
        assert_eq!(field.len(), STRING_LEN);
        assert_eq!(&field[..3], b"Bob");
        assert!(field[3..].iter().all(|&b| b == b' '));
        assert_eq!(decode_string(&field), "Bob");
    }

    #[test]
    fn string_field_truncates_at_64() {
        let long = "x".repeat(100);
        let field = encode_string(&long);
        assert_eq!(decode_string(&field), "x".repeat(64));
    }

    #[test]
    fn non_ascii_is_replaced() {
        let field = encode_string("héllo");
        let decoded = decode_string(&field);
        assert!(decoded.is_ascii());
        assert!(decoded.contains('?'));
    }

    #[test]
    fn position_deltas_in_blocks() {
        let a = Position::from_blocks(10.0, 5.0, 10.0);
        let b = Position::from_blocks(13.0, 6.5, 14.0);
        assert!((a.horizontal_delta_sq(&b) - 25.0).abs() < 1e-3);
        assert!((a.vertical_delta(&b) - 1.5).abs() < 1e-3);
    }
}
