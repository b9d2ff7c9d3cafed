//! Per-session anti-cheat heuristics for inbound movement, block, and
//! chat packets.
//!
//! All thresholds come from [`crate::config::Thresholds`]; operators
//! get the permissive set. Every check takes an explicit `now` so the
//! windows are deterministic under test.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use cobalt_protocol::{Position, text};

use crate::block;
use crate::config::Thresholds;
use crate::world::World;

/// Bounded, time-ordered record of recent event timestamps. Detects a
/// burst when `capacity` events already sit inside `interval` as a new
/// one arrives. Never holds more than `capacity` entries.
#[derive(Debug)]
pub struct EventWindow {
    capacity: usize,
    interval: Duration,
    events: VecDeque<Instant>,
}

impl EventWindow {
    pub fn new(capacity: usize, interval: Duration) -> Self {
        Self {
            capacity,
            interval,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Record one event. Returns true when the burst threshold is
    /// exceeded.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.events.front() {
            if now.duration_since(oldest) >= self.interval {
                self.events.pop_front();
            } else {
                break;
            }
        }
        let exceeded = self.events.len() >= self.capacity;
        if exceeded {
            // Evict the oldest so the window stays bounded.
            self.events.pop_front();
        }
        self.events.push_back(now);
        exceeded
    }
}

// ── Movement ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementVerdict {
    Accept,
    /// Displacement tolerated once (knockback, teleport-adjacent
    /// jitter); the position is forwarded but not confirmed valid.
    Tolerate,
    /// Second consecutive offender or rate abuse: re-send the last
    /// valid position to the client.
    Reject,
}

pub struct MovementMonitor {
    thresholds: Thresholds,
    rate: EventWindow,
    last_valid: Position,
    strikes: u8,
}

impl MovementMonitor {
    pub fn new(thresholds: &Thresholds, spawn: Position) -> Self {
        Self {
            rate: EventWindow::new(
                thresholds.movement_packets,
                Duration::from_millis(thresholds.movement_interval_ms),
            ),
            thresholds: thresholds.clone(),
            last_valid: spawn,
            strikes: 0,
        }
    }

    pub fn last_valid(&self) -> Position {
        self.last_valid
    }

    pub fn check(&mut self, proposed: Position, now: Instant) -> MovementVerdict {
        if self.rate.record(now) {
            return MovementVerdict::Reject;
        }

        let horizontal = self.last_valid.horizontal_delta_sq(&proposed);
        let vertical = self.last_valid.vertical_delta(&proposed);
        let offending = horizontal > self.thresholds.max_horizontal_delta_sq
            || vertical > self.thresholds.max_jump;

        if !offending {
            self.last_valid = proposed;
            self.strikes = 0;
            return MovementVerdict::Accept;
        }
        self.strikes += 1;
        if self.strikes >= 2 {
            self.strikes = 0;
            MovementVerdict::Reject
        } else {
            MovementVerdict::Tolerate
        }
    }
}

// ── Block placement ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockVerdict {
    Allow,
    /// Outside world bounds: dropped without punishment.
    Ignore,
    Kick(&'static str),
}

pub const KICK_BLOCK_SPAM: &str = "You are building too fast";
pub const KICK_BLOCK_REACH: &str = "You cannot build that far away";
pub const KICK_BLOCK_TYPE: &str = "Illegal block type";
pub const KICK_BLOCK_PROTECTED: &str = "You may not change that block";

pub struct BlockMonitor {
    thresholds: Thresholds,
    rate: EventWindow,
}

impl BlockMonitor {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            rate: EventWindow::new(
                thresholds.block_packets,
                Duration::from_secs(thresholds.block_interval_secs),
            ),
            thresholds: thresholds.clone(),
        }
    }

    /// Judge one block edit. `held` is the type being placed (or the
    /// held type on removal); removal also checks the block being
    /// destroyed.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        world: &World,
        player: Position,
        x: i16,
        y: i16,
        z: i16,
        held: u8,
        placing: bool,
        custom_blocks: bool,
        operator: bool,
        now: Instant,
    ) -> BlockVerdict {
        if self.rate.record(now) {
            return BlockVerdict::Kick(KICK_BLOCK_SPAM);
        }
        if !world.in_bounds(x, y, z) {
            return BlockVerdict::Ignore;
        }
        if player.distance_to_block(x, y, z) > self.thresholds.block_reach {
            return BlockVerdict::Kick(KICK_BLOCK_REACH);
        }
        if held > block::ceiling(custom_blocks) {
            return BlockVerdict::Kick(KICK_BLOCK_TYPE);
        }
        if !operator {
            let touched = if placing { held } else { world.get_block(x, y, z) };
            if block::is_protected(touched) {
                return BlockVerdict::Kick(KICK_BLOCK_PROTECTED);
            }
        }
        BlockVerdict::Allow
    }
}

// ── Chat ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatVerdict {
    Allow,
    Kick(&'static str),
}

pub const KICK_CHAT_CHARS: &str = "Illegal characters in chat";
pub const KICK_CHAT_SPAM: &str = "You are sending messages too quickly";

pub struct ChatMonitor {
    rate: EventWindow,
}

impl ChatMonitor {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            rate: EventWindow::new(
                thresholds.chat_messages,
                Duration::from_secs(thresholds.chat_interval_secs),
            ),
        }
    }

    pub fn check(&mut self, message: &str, now: Instant) -> ChatVerdict {
        if text::has_illegal_chars(message) {
            return ChatVerdict::Kick(KICK_CHAT_CHARS);
        }
        if self.rate.record(now) {
            return ChatVerdict::Kick(KICK_CHAT_SPAM);
        }
        ChatVerdict::Allow
    }
}
