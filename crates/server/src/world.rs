//! The block world consumed by sessions: bounded flat array of block
//! ids plus the compressed-snapshot provider used for world transfer.

use std::io::Write;
use std::sync::RwLock;

use anyhow::{Context, Result};
use cobalt_protocol::Position;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::block;

/// The entire block world. Coarse `RwLock` over the flat array:
/// individual edits are brief, and the only long read (the snapshot)
/// copies the buffer out before compressing.
pub struct World {
    width: i16,
    height: i16,
    length: i16,
    blocks: RwLock<Box<[u8]>>,
}

impl World {
    /// Generate a flat world: stone up to the half-height, dirt above,
    /// one grass layer on top.
    pub fn generate_flat(width: i16, height: i16, length: i16) -> Self {
        let volume = width as usize * height as usize * length as usize;
        let mut blocks = vec![block::AIR; volume].into_boxed_slice();
        let surface = (height / 2 - 1).max(0);
        for y in 0..=surface {
            let fill = if y == surface {
                block::GRASS
            } else if y >= surface - 2 {
                block::DIRT
            } else {
                block::STONE
            };
            for z in 0..length {
                for x in 0..width {
                    blocks[index(width, length, x, y, z)] = fill;
                }
            }
        }
        Self {
            width,
            height,
            length,
            blocks: RwLock::new(blocks),
        }
    }

    pub fn dimensions(&self) -> (i16, i16, i16) {
        (self.width, self.height, self.length)
    }

    pub fn in_bounds(&self, x: i16, y: i16, z: i16) -> bool {
        x >= 0 && y >= 0 && z >= 0 && x < self.width && y < self.height && z < self.length
    }

    /// Read a block. Out-of-bounds reads are air.
    pub fn get_block(&self, x: i16, y: i16, z: i16) -> u8 {
        if !self.in_bounds(x, y, z) {
            return block::AIR;
        }
        self.blocks.read().expect("world lock poisoned")[index(self.width, self.length, x, y, z)]
    }

    /// Write a block. Returns false when the write was a no-op (out of
    /// bounds or same type already present).
    pub fn set_block(&self, actor: &str, x: i16, y: i16, z: i16, new: u8) -> bool {
        if !self.in_bounds(x, y, z) {
            return false;
        }
        let idx = index(self.width, self.length, x, y, z);
        let mut blocks = self.blocks.write().expect("world lock poisoned");
        if blocks[idx] == new {
            return false;
        }
        tracing::debug!("{} set ({}, {}, {}) {} -> {}", actor, x, y, z, blocks[idx], new);
        blocks[idx] = new;
        true
    }

    /// Spawn point: world center, two blocks above the surface.
    pub fn spawn(&self) -> Position {
        Position::from_blocks(
            self.width as f32 / 2.0,
            (self.height / 2 + 2) as f32,
            self.length as f32 / 2.0,
        )
    }

    /// Copy of the raw block array.
    pub fn snapshot(&self) -> Vec<u8> {
        self.blocks.read().expect("world lock poisoned").to_vec()
    }

    /// Gzip-compressed world-transfer payload: 4-byte big-endian block
    /// count followed by the raw block array. When `custom_blocks` is
    /// false every block is translated through the fallback table
    /// before compression.
    pub fn snapshot_gzip(&self, custom_blocks: bool) -> Result<Vec<u8>> {
        let raw = self.snapshot();
        let raw = if custom_blocks {
            raw
        } else {
            block::translate_snapshot(&raw)
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&(raw.len() as u32).to_be_bytes())
            .context("writing block count")?;
        encoder.write_all(&raw).context("writing block array")?;
        encoder.finish().context("finishing gzip stream")
    }
}

#[inline]
fn index(width: i16, length: i16, x: i16, y: i16, z: i16) -> usize {
    (y as usize * length as usize + z as usize) * width as usize + x as usize
}
