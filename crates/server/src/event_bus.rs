//! World-change event bus for cross-session distribution.
//!
//! Every session that edits the world publishes a [`BlockChangeBatch`]
//! to a shared `tokio::sync::broadcast` channel. Each session loop
//! subscribes and enqueues changes it did not originate onto its own
//! block-update queue -- nothing writes to another session's socket.

use std::sync::Arc;

/// Recommended capacity for the broadcast channel. 256 batches in
/// flight handles bursty edits without lagging subscribers.
pub const BUS_CAPACITY: usize = 256;

/// Identifies where a batch of block changes originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSource {
    /// A session, identified by its numeric identity.
    Session(i8),
    /// The server itself (corrections, admin edits).
    Server,
}

/// A batch of block changes.
///
/// Uses `Arc<[...]>` so cloning per broadcast subscriber is just a
/// refcount bump.
#[derive(Clone, Debug)]
pub struct BlockChangeBatch {
    pub source: ChangeSource,
    pub changes: Arc<[(i16, i16, i16, u8)]>,
}

impl BlockChangeBatch {
    pub fn single(source: ChangeSource, x: i16, y: i16, z: i16, block: u8) -> Self {
        Self {
            source,
            changes: vec![(x, y, z, block)].into(),
        }
    }
}
