//! Shared session registry for multiplayer visibility.
//!
//! Tracks every connected session, owns the numeric entity-id pool,
//! and fans chat and entity packets out to the per-session queues.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cobalt_protocol::types::decode_string;
use cobalt_protocol::{Packet, text};

use crate::net::session::SessionShared;

pub const KICK_REPLACED: &str = "Logged in from another location";
pub const KICK_DISPLACED: &str = "Kicked to make room for an operator";

/// How long an evictor waits for a kicked session to finish teardown
/// before reclaiming its slot by force.
const EVICTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a registration was refused. The reason string goes straight
/// into the rejection kick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRefusal {
    Full,
    AddressLimit,
}

impl RegisterRefusal {
    pub fn reason(&self) -> &'static str {
        match self {
            RegisterRefusal::Full => "Server is full",
            RegisterRefusal::AddressLimit => "Too many connections from your address",
        }
    }
}

struct Inner {
    sessions: Vec<Arc<SessionShared>>,
    free_ids: BTreeSet<i8>,
}

/// Thread-safe registry of all connected sessions.
///
/// Uses `std::sync::Mutex` because every operation is brief (no awaits
/// while the lock is held); the awaited eviction handshakes happen
/// between lock scopes.
pub struct Registry {
    inner: Mutex<Inner>,
    capacity: usize,
    max_per_address: usize,
}

impl Registry {
    pub fn new(capacity: usize, max_per_address: usize) -> Self {
        // Entity ids are i8 on the wire and -1 means "self", so the
        // pool is capped at 0..=126 regardless of configured capacity.
        let capacity = capacity.min(127);
        Self {
            inner: Mutex::new(Inner {
                sessions: Vec::new(),
                free_ids: (0..capacity as i8).collect(),
            }),
            capacity,
            max_per_address,
        }
    }

    /// Register a session, assigning it an entity id.
    ///
    /// A same-name session is kicked first and its teardown awaited, so
    /// at no point do two live sessions share a name. When the server
    /// is full an operator displaces the newest non-operator arrival.
    pub async fn register(&self, shared: &Arc<SessionShared>) -> Result<i8, RegisterRefusal> {
        loop {
            // The name check and the insert share one lock acquisition,
            // so two racing registrations of the same name can never
            // both pass it.
            let (victim, reason) = {
                let mut inner = self.inner.lock().expect("registry lock poisoned");
                if let Some(existing) = inner
                    .sessions
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(&shared.name))
                    .cloned()
                {
                    tracing::info!("{} reconnected, replacing the old session", shared.name);
                    (existing, KICK_REPLACED)
                } else {
                    let per_address = inner
                        .sessions
                        .iter()
                        .filter(|s| s.addr == shared.addr)
                        .count();
                    if per_address >= self.max_per_address {
                        return Err(RegisterRefusal::AddressLimit);
                    }
                    if inner.sessions.len() < self.capacity {
                        let Some(id) = inner.free_ids.pop_first() else {
                            return Err(RegisterRefusal::Full);
                        };
                        shared.set_id(id);
                        inner.sessions.push(Arc::clone(shared));
                        return Ok(id);
                    }
                    if !shared.operator {
                        return Err(RegisterRefusal::Full);
                    }
                    match inner.sessions.iter().rev().find(|s| !s.operator).cloned() {
                        Some(v) => {
                            tracing::info!(
                                "displacing {} to admit operator {}",
                                v.name,
                                shared.name
                            );
                            (v, KICK_DISPLACED)
                        }
                        None => return Err(RegisterRefusal::Full),
                    }
                }
            };
            victim.kick(reason);
            self.await_exit(&victim).await;
        }
    }

    /// Wait for a kicked session's owning task to finish teardown.
    /// A wedged session is forcibly dropped from the registry so the
    /// evictor always makes progress.
    async fn await_exit(&self, session: &Arc<SessionShared>) {
        let Some(exit_rx) = session.take_exit_signal() else {
            // Someone else is already waiting this session out; its
            // unregister still frees the slot.
            return;
        };
        match tokio::time::timeout(EVICTION_TIMEOUT, exit_rx).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("{} did not exit within {:?}", session.name, EVICTION_TIMEOUT);
                self.unregister(session);
            }
        }
    }

    /// Remove a session and return its entity id to the pool. Idempotent.
    pub fn unregister(&self, shared: &Arc<SessionShared>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let before = inner.sessions.len();
        inner.sessions.retain(|s| !Arc::ptr_eq(s, shared));
        if inner.sessions.len() < before {
            inner.free_ids.insert(shared.id());
        }
    }

    pub fn find_by_exact_name(&self, name: &str) -> Option<Arc<SessionShared>> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .sessions
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// All sessions whose name starts with `prefix`, case-insensitive.
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<Arc<SessionShared>> {
        let prefix = prefix.to_ascii_lowercase();
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .sessions
            .iter()
            .filter(|s| s.name.to_ascii_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Snapshot of all currently registered sessions.
    pub fn snapshot(&self) -> Vec<Arc<SessionShared>> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .sessions
            .clone()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").sessions.len()
    }

    /// Queue a packet for every session.
    pub fn broadcast_packet(&self, packet: &Packet) {
        for session in self.snapshot() {
            session.enqueue(packet.clone());
        }
    }

    /// Queue a packet for every session except the one with entity id
    /// `except`.
    pub fn broadcast_except(&self, except: i8, packet: &Packet) {
        for session in self.snapshot() {
            if session.id() != except {
                session.enqueue(packet.clone());
            }
        }
    }

    /// Wrap a chat line into wire frames and queue each frame for every
    /// session, attributed to entity `from`.
    pub fn broadcast_message(&self, from: i8, message: &str) {
        let frames: Vec<String> = text::wrap(message)
            .iter()
            .map(|frame| decode_string(frame))
            .collect();
        for session in self.snapshot() {
            for frame in &frames {
                session.enqueue(Packet::Message { id: from, text: frame.clone() });
            }
        }
    }
}
