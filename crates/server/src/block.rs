//! Block type definitions, legality ceilings, and the fallback
//! translation table for clients without the custom-blocks capability.

/// Highest block id in the standard set. Anything above this requires
/// the custom-blocks capability.
pub const LEGAL_CEILING: u8 = 49;

/// Highest block id in the level-1 custom set.
pub const CUSTOM_CEILING: u8 = 65;

/// Custom-block support level the server speaks.
pub const SUPPORT_LEVEL: u8 = 1;

// -- Standard block ids used by name in the server --

pub const AIR: u8 = 0;
pub const STONE: u8 = 1;
pub const GRASS: u8 = 2;
pub const DIRT: u8 = 3;
pub const BEDROCK: u8 = 7;
pub const WATER: u8 = 8;
pub const STILL_WATER: u8 = 9;
pub const LAVA: u8 = 10;
pub const STILL_LAVA: u8 = 11;

/// Blocks only operators may place or remove.
pub fn is_protected(block: u8) -> bool {
    matches!(block, BEDROCK | WATER | STILL_WATER | LAVA | STILL_LAVA)
}

/// Ceiling for a session: custom blocks when negotiated, standard
/// otherwise.
pub fn ceiling(custom_blocks: bool) -> u8 {
    if custom_blocks { CUSTOM_CEILING } else { LEGAL_CEILING }
}

/// Map a custom block id to the nearest standard id. Standard ids map
/// to themselves; ids beyond the custom set degrade to stone.
pub fn fallback(block: u8) -> u8 {
    match block {
        0..=LEGAL_CEILING => block,
        50 => 44, // cobblestone slab -> slab
        51 => 39, // rope -> brown mushroom
        52 => 12, // sandstone -> sand
        53 => 0,  // snow -> air
        54 => 10, // fire -> lava
        55 => 33, // light pink wool -> pink wool
        56 => 25, // forest green wool -> green wool
        57 => 3,  // brown wool -> dirt
        58 => 29, // deep blue wool -> blue wool
        59 => 28, // turquoise wool -> cyan wool
        60 => 20, // ice -> glass
        61 => 42, // ceramic tile -> iron
        62 => 49, // magma -> obsidian
        63 => 36, // pillar -> white wool
        64 => 5,  // crate -> planks
        65 => 1,  // stone brick -> stone
        _ => STONE,
    }
}

/// Translate a whole world snapshot for a client without custom-block
/// support. Pure: returns a new buffer, never mutates in place.
pub fn translate_snapshot(blocks: &[u8]) -> Vec<u8> {
    blocks.iter().map(|&b| fallback(b)).collect()
}
