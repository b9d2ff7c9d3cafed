//! Per-connection session engine: lifecycle state, the dual outbound
//! queues with the block-rate throttle, and the steady-state loop.
//!
//! One tokio task owns each session. Other tasks interact with it only
//! through the thread-safe queues, the atomic lifecycle state, and the
//! one-shot exit signal used for synchronous eviction.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI8, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use cobalt_protocol::{Packet, Position, read_packet_after_opcode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};

use crate::ServerState;
use crate::block;
use crate::event_bus::{BlockChangeBatch, ChangeSource};
use crate::heuristics::{
    BlockMonitor, BlockVerdict, ChatMonitor, ChatVerdict, MovementMonitor, MovementVerdict,
};
use crate::net::login;

/// Fixed sleep between cooperative loop passes; doubles as the inbound
/// read timeout.
const LOOP_INTERVAL: Duration = Duration::from_millis(50);

/// Keep-alive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Entity id a client uses for itself.
pub const SELF_ID: i8 = -1;

pub const KICK_PROTOCOL: &str = "Unexpected packet";

/// Capability set negotiated at login; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub custom_blocks: bool,
    pub block_permissions: bool,
    pub two_way_ping: bool,
    pub support_level: u8,
}

/// Session lifecycle, transitioned through the atomic in
/// [`SessionShared`]. `Open` is the only state that accepts enqueues
/// and inbound packets; `Closing` means a disconnect packet is queued;
/// `Closed` is set once the terminal packet has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Lifecycle {
        match v {
            0 => Lifecycle::Open,
            1 => Lifecycle::Closing,
            _ => Lifecycle::Closed,
        }
    }
}

/// The cross-thread face of a session: identity, capability set,
/// outbound queues, lifecycle, and the eviction exit signal.
pub struct SessionShared {
    pub name: String,
    pub addr: IpAddr,
    pub operator: bool,
    pub caps: CapabilitySet,
    id: AtomicI8,
    lifecycle: AtomicU8,
    position: Mutex<Position>,
    general: Mutex<VecDeque<Packet>>,
    blocks: Mutex<VecDeque<Packet>>,
    exit_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl SessionShared {
    /// Create the shared state plus the exit-signal sender the owning
    /// task fires after full teardown.
    pub fn new(
        name: String,
        addr: IpAddr,
        operator: bool,
        caps: CapabilitySet,
        spawn: Position,
    ) -> (Arc<SessionShared>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(SessionShared {
            name,
            addr,
            operator,
            caps,
            id: AtomicI8::new(SELF_ID),
            lifecycle: AtomicU8::new(Lifecycle::Open as u8),
            position: Mutex::new(spawn),
            general: Mutex::new(VecDeque::new()),
            blocks: Mutex::new(VecDeque::new()),
            exit_rx: Mutex::new(Some(rx)),
        });
        (shared, tx)
    }

    pub fn id(&self) -> i8 {
        self.id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_id(&self, id: i8) {
        self.id.store(id, Ordering::SeqCst);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }

    pub fn position(&self) -> Position {
        *self.position.lock().expect("position lock poisoned")
    }

    pub fn set_position(&self, pos: Position) {
        *self.position.lock().expect("position lock poisoned") = pos;
    }

    /// Enqueue onto the general queue. Refused once the session is no
    /// longer open.
    pub fn enqueue(&self, packet: Packet) -> bool {
        if !self.is_open() {
            return false;
        }
        self.general.lock().expect("queue lock poisoned").push_back(packet);
        true
    }

    /// Enqueue onto the block-update queue.
    pub fn enqueue_block(&self, packet: Packet) -> bool {
        if !self.is_open() {
            return false;
        }
        self.blocks.lock().expect("queue lock poisoned").push_back(packet);
        true
    }

    /// Queue a terminal packet and disable receive/enqueue immediately.
    /// The drain loop delivers the reason before the socket closes.
    pub fn kick(&self, reason: &str) {
        let was_open = self
            .lifecycle
            .compare_exchange(
                Lifecycle::Open as u8,
                Lifecycle::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if was_open {
            self.general
                .lock()
                .expect("queue lock poisoned")
                .push_back(Packet::Disconnect { reason: reason.into() });
        }
    }

    fn mark_closed(&self) {
        self.lifecycle.store(Lifecycle::Closed as u8, Ordering::SeqCst);
    }

    /// Hand the one-shot exit signal to an evictor. Only the first
    /// caller gets it.
    pub fn take_exit_signal(&self) -> Option<oneshot::Receiver<()>> {
        self.exit_rx.lock().expect("exit lock poisoned").take()
    }

    fn pop_general(&self) -> Option<Packet> {
        self.general.lock().expect("queue lock poisoned").pop_front()
    }

    fn pop_block(&self) -> Option<Packet> {
        self.blocks.lock().expect("queue lock poisoned").pop_front()
    }
}

/// Translate an outgoing block-set packet for a session without the
/// custom-blocks capability. All other packets pass through untouched.
pub fn translate_outgoing(packet: Packet, caps: &CapabilitySet) -> Packet {
    match packet {
        Packet::SetBlockServer { x, y, z, block: b }
            if !caps.custom_blocks && b > block::LEGAL_CEILING =>
        {
            Packet::SetBlockServer { x, y, z, block: block::fallback(b) }
        }
        other => other,
    }
}

/// Rolling one-second window for the block-queue throttle.
pub struct DrainState {
    window_start: Instant,
    sent_this_window: usize,
}

impl DrainState {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            sent_this_window: 0,
        }
    }
}

impl Default for DrainState {
    fn default() -> Self {
        Self::new()
    }
}

/// One drain pass: the general queue fully, then the block queue up to
/// the per-second cap. Returns true when a disconnect packet was
/// written and the session is over.
pub async fn drain_outbound<W>(
    shared: &SessionShared,
    write: &mut W,
    state: &mut DrainState,
    cap: usize,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = shared.pop_general() {
        let terminal = matches!(packet, Packet::Disconnect { .. });
        let packet = translate_outgoing(packet, &shared.caps);
        write.write_all(&packet.encode()).await?;
        if terminal {
            write.flush().await?;
            shared.mark_closed();
            return Ok(true);
        }
    }

    if state.window_start.elapsed() >= Duration::from_secs(1) {
        state.window_start = Instant::now();
        state.sent_this_window = 0;
    }
    while state.sent_this_window < cap {
        let Some(packet) = shared.pop_block() else { break };
        let packet = translate_outgoing(packet, &shared.caps);
        write.write_all(&packet.encode()).await?;
        state.sent_this_window += 1;
    }

    write.flush().await?;
    Ok(false)
}

/// Handle one accepted TCP connection through login and steady state.
pub async fn handle(stream: TcpStream, addr: IpAddr, state: Arc<ServerState>) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (read, write) = stream.into_split();
    run(read, write, addr, state).await
}

/// Transport-generic session entry point (tests drive this with
/// in-memory duplex streams).
pub async fn run<R, W>(mut read: R, mut write: W, addr: IpAddr, state: Arc<ServerState>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let timeout = Duration::from_secs(state.config.connection_timeout_secs);
    let established =
        match tokio::time::timeout(timeout, login::negotiate(&mut read, &mut write, addr, &state))
            .await
        {
            Err(_) => {
                tracing::info!("{} login timed out", addr);
                let kick = Packet::Disconnect { reason: "Login timed out".into() };
                let _ = write.write_all(&kick.encode()).await;
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Err(rejection))) => {
                tracing::info!(
                    "{} rejected at {:?}: {}",
                    addr,
                    rejection.step,
                    rejection.reason
                );
                let kick = Packet::Disconnect { reason: rejection.reason };
                let _ = write.write_all(&kick.encode()).await;
                let _ = write.flush().await;
                return Ok(());
            }
            Ok(Ok(Ok(established))) => established,
        };

    let login::Established { shared, exit_tx, spawn } = established;
    tracing::info!("{} ({}) joined as #{}", shared.name, addr, shared.id());

    let result = steady_loop(&mut read, &mut write, &shared, spawn, &state).await;
    if let Err(e) = &result {
        // An internal fault tears the session down; it never takes the
        // process with it.
        tracing::error!("{} session loop fault: {:#}", shared.name, e);
    }

    // Teardown: leave the registry first so the name and numeric id
    // are free before the exit signal fires.
    state.registry.unregister(&shared);
    state
        .registry
        .broadcast_packet(&Packet::DespawnEntity { id: shared.id() });
    state
        .registry
        .broadcast_message(SELF_ID, &format!("&e{} left the game", shared.name));
    let _ = exit_tx.send(());
    tracing::info!("{} ({}) disconnected", shared.name, addr);
    Ok(())
}

async fn steady_loop<R, W>(
    read: &mut R,
    write: &mut W,
    shared: &Arc<SessionShared>,
    spawn: Position,
    state: &Arc<ServerState>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let thresholds = if shared.operator {
        &state.config.anticheat.operator
    } else {
        &state.config.anticheat.normal
    };
    let mut movement = MovementMonitor::new(thresholds, spawn);
    let mut blocks = BlockMonitor::new(thresholds);
    let mut chat = ChatMonitor::new(thresholds);
    let mut drain = DrainState::new();
    let mut bus_rx = state.bus.subscribe();
    let mut last_ping = Instant::now();
    let cap = state.config.throttle.block_packets_per_second;

    loop {
        // Forward world changes from other sessions onto our own
        // block-update queue.
        pump_bus(&mut bus_rx, shared);

        if drain_outbound(shared, write, &mut drain, cap).await? {
            return Ok(());
        }

        if last_ping.elapsed() >= PING_INTERVAL {
            last_ping = Instant::now();
            shared.enqueue(Packet::Ping);
        }

        if !shared.is_open() {
            // Receive is disabled; keep draining until the terminal
            // packet goes out.
            tokio::time::sleep(LOOP_INTERVAL).await;
            continue;
        }

        // Only the one-byte opcode poll may be cancelled by the loop
        // timeout; dropping a multi-byte read mid-packet would lose
        // the consumed bytes and desync the framing.
        let opcode_byte = match tokio::time::timeout(LOOP_INTERVAL, read.read_u8()).await {
            Err(_) => continue, // nothing readable this pass
            Ok(Err(e)) => {
                tracing::debug!("{} transport closed: {}", shared.name, e);
                return Ok(());
            }
            Ok(Ok(byte)) => byte,
        };
        match read_packet_after_opcode(read, opcode_byte).await {
            Ok(packet) => {
                handle_inbound(packet, shared, &mut movement, &mut blocks, &mut chat, state)
            }
            Err(e) if e.is_transport() => {
                tracing::debug!("{} transport closed: {}", shared.name, e);
                return Ok(());
            }
            Err(e) => {
                tracing::info!("{} protocol violation: {}", shared.name, e);
                shared.kick(KICK_PROTOCOL);
            }
        }
    }
}

fn pump_bus(bus_rx: &mut broadcast::Receiver<BlockChangeBatch>, shared: &SessionShared) {
    loop {
        match bus_rx.try_recv() {
            Ok(batch) => {
                if batch.source == ChangeSource::Session(shared.id()) {
                    continue;
                }
                for &(x, y, z, b) in batch.changes.iter() {
                    shared.enqueue_block(Packet::SetBlockServer { x, y, z, block: b });
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!("{} lagged {} world-change batches", shared.name, skipped);
            }
            Err(_) => break,
        }
    }
}

fn handle_inbound(
    packet: Packet,
    shared: &Arc<SessionShared>,
    movement: &mut MovementMonitor,
    blocks: &mut BlockMonitor,
    chat: &mut ChatMonitor,
    state: &Arc<ServerState>,
) {
    let now = Instant::now();
    match packet {
        Packet::Teleport { pos, .. } => match movement.check(pos, now) {
            MovementVerdict::Accept | MovementVerdict::Tolerate => {
                shared.set_position(pos);
                state.registry.broadcast_except(
                    shared.id(),
                    &Packet::Teleport { id: shared.id(), pos },
                );
            }
            MovementVerdict::Reject => {
                shared.enqueue(Packet::Teleport { id: SELF_ID, pos: movement.last_valid() });
            }
        },

        Packet::SetBlockClient { x, y, z, mode, block: held } => {
            let placing = mode != 0;
            let verdict = blocks.check(
                &state.world,
                movement.last_valid(),
                x,
                y,
                z,
                held,
                placing,
                shared.caps.custom_blocks,
                shared.operator,
                now,
            );
            match verdict {
                BlockVerdict::Allow => {
                    let new = if placing { held } else { block::AIR };
                    if state.world.set_block(&shared.name, x, y, z, new) {
                        let _ = state.bus.send(BlockChangeBatch::single(
                            ChangeSource::Session(shared.id()),
                            x,
                            y,
                            z,
                            new,
                        ));
                    }
                }
                BlockVerdict::Ignore => {}
                BlockVerdict::Kick(reason) => shared.kick(reason),
            }
        }

        Packet::Message { text, .. } => match chat.check(&text, now) {
            ChatVerdict::Allow => {
                let line = format!("{}: &f{}", shared.name, text);
                state.registry.broadcast_message(shared.id(), &line);
            }
            ChatVerdict::Kick(reason) => shared.kick(reason),
        },

        Packet::TwoWayPing { server_to_client, data } => {
            if shared.caps.two_way_ping {
                shared.enqueue(Packet::TwoWayPing { server_to_client, data });
            }
        }

        Packet::Ping => {}

        // Anything else from an established client is a protocol
        // violation: the login opcodes may not recur, and server-only
        // opcodes never arrive inbound.
        other => {
            tracing::info!("{} sent unexpected {:?}", shared.name, other.opcode());
            shared.kick(KICK_PROTOCOL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared(caps: CapabilitySet) -> Arc<SessionShared> {
        let (shared, _tx) = SessionShared::new(
            "Tester".into(),
            "127.0.0.1".parse().unwrap(),
            false,
            caps,
            Position::default(),
        );
        shared
    }

    #[test]
    fn lifecycle_gates_enqueue_and_receive() {
        let shared = test_shared(CapabilitySet::default());
        assert!(shared.enqueue(Packet::Ping));
        shared.kick("bye");
        assert_eq!(shared.lifecycle(), Lifecycle::Closing);
        assert!(!shared.enqueue(Packet::Ping));
        assert!(!shared.enqueue_block(Packet::Ping));
        // A second kick neither double-queues nor regresses the state.
        shared.kick("again");
        assert_eq!(shared.lifecycle(), Lifecycle::Closing);
    }

    #[test]
    fn exit_signal_is_single_take() {
        let shared = test_shared(CapabilitySet::default());
        assert!(shared.take_exit_signal().is_some());
        assert!(shared.take_exit_signal().is_none());
    }

    #[test]
    fn outgoing_translation_uses_fallback_table() {
        let caps = CapabilitySet::default();
        let p = translate_outgoing(
            Packet::SetBlockServer { x: 1, y: 2, z: 3, block: 50 },
            &caps,
        );
        assert_eq!(p, Packet::SetBlockServer { x: 1, y: 2, z: 3, block: 44 });

        let caps = CapabilitySet { custom_blocks: true, ..CapabilitySet::default() };
        let p = translate_outgoing(
            Packet::SetBlockServer { x: 1, y: 2, z: 3, block: 50 },
            &caps,
        );
        assert_eq!(p, Packet::SetBlockServer { x: 1, y: 2, z: 3, block: 50 });
    }

    #[tokio::test]
    async fn block_queue_respects_per_second_cap() {
        let shared = test_shared(CapabilitySet::default());
        for n in 0..100i16 {
            shared.enqueue_block(Packet::SetBlockServer { x: n, y: 0, z: 0, block: 1 });
        }
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut server_write = server;
        let mut drain = DrainState::new();

        let ended = drain_outbound(&shared, &mut server_write, &mut drain, 25)
            .await
            .unwrap();
        assert!(!ended);
        drop(server_write);

        use tokio::io::AsyncReadExt;
        let mut bytes = Vec::new();
        client.read_to_end(&mut bytes).await.unwrap();
        // 25 block packets at 8 bytes each, nothing more.
        assert_eq!(bytes.len(), 25 * 8);
    }

    #[tokio::test]
    async fn disconnect_terminates_drain_after_delivery() {
        let shared = test_shared(CapabilitySet::default());
        shared.enqueue(Packet::Message { id: 0, text: "first".into() });
        shared.kick("You are building too fast");
        shared.enqueue_block(Packet::SetBlockServer { x: 0, y: 0, z: 0, block: 1 });

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut server_write = server;
        let mut drain = DrainState::new();
        let ended = drain_outbound(&shared, &mut server_write, &mut drain, 100)
            .await
            .unwrap();
        assert!(ended);
        assert_eq!(shared.lifecycle(), Lifecycle::Closed);
        drop(server_write);

        use tokio::io::AsyncReadExt;
        let mut bytes = Vec::new();
        client.read_to_end(&mut bytes).await.unwrap();
        // Message (66) then Disconnect (65); the queued block packet
        // never goes out after the terminal write.
        assert_eq!(bytes.len(), 66 + 65);
        assert_eq!(bytes[66], 0x0e);
    }
}
