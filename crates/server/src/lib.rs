//! Session-oriented server for the classic voxel game protocol:
//! login negotiation, the shared world, per-session outbound queues,
//! and the anti-cheat heuristics.

use std::sync::Arc;

use tokio::sync::broadcast;

pub mod access;
pub mod block;
pub mod config;
pub mod event_bus;
pub mod heuristics;
pub mod net;
pub mod registry;
pub mod world;

use access::AccessLists;
use config::Config;
use event_bus::BlockChangeBatch;
use registry::Registry;
use world::World;

/// Everything a session task needs, behind one `Arc`.
pub struct ServerState {
    pub config: Config,
    pub salt: String,
    pub world: World,
    pub registry: Registry,
    pub access: AccessLists,
    pub bus: broadcast::Sender<BlockChangeBatch>,
}

impl ServerState {
    pub fn new(config: Config) -> Arc<ServerState> {
        let salt = config.effective_salt();
        let world = World::generate_flat(
            config.world.width,
            config.world.height,
            config.world.length,
        );
        let registry = Registry::new(config.max_sessions, config.max_per_address);
        let (bus, _) = broadcast::channel(event_bus::BUS_CAPACITY);
        Arc::new(ServerState {
            salt,
            world,
            registry,
            access: AccessLists::new(),
            bus,
            config,
        })
    }
}
