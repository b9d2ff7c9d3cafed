//! Server configuration: identity, capacity, world dimensions, and
//! every anti-cheat threshold. Loaded from a TOML file; every field
//! has a default so a missing file still yields a runnable server.

use std::path::Path;

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server name shown in the handshake ack.
    pub name: String,
    pub motd: String,
    pub bind: String,
    /// Hard cap on concurrent sessions. The numeric identity pool is
    /// bounded by this (at most 127).
    pub max_sessions: usize,
    pub max_per_address: usize,
    /// When true, the handshake token must be the salted hash of the
    /// player name.
    pub verify_names: bool,
    /// Pre-shared salt for name verification. When empty, a random
    /// per-process salt is derived at startup.
    pub salt: String,
    pub use_allowlist: bool,
    /// Names granted operator status (and the permissive thresholds).
    pub operators: Vec<String>,
    /// Server-side switch for the capability-negotiation extension.
    pub extensions: bool,
    /// Bound on the blocking reads during login, in seconds.
    pub connection_timeout_secs: u64,
    pub world: WorldConfig,
    pub throttle: ThrottleConfig,
    pub anticheat: AntiCheatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: i16,
    pub height: i16,
    pub length: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Per-session cap on block-update packets written per second.
    pub block_packets_per_second: usize,
}

/// Anti-cheat thresholds: one set for ordinary players, a more
/// permissive one for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatConfig {
    pub normal: Thresholds,
    pub operator: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Squared horizontal displacement per movement packet, in blocks.
    pub max_horizontal_delta_sq: f32,
    /// Vertical displacement per movement packet, in blocks.
    pub max_jump: f32,
    pub movement_packets: usize,
    pub movement_interval_ms: u64,
    /// Maximum Euclidean block-edit reach, in blocks.
    pub block_reach: f32,
    pub block_packets: usize,
    pub block_interval_secs: u64,
    pub chat_messages: usize,
    pub chat_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Cobalt Server".into(),
            motd: "A classic voxel world".into(),
            bind: "0.0.0.0:25565".into(),
            max_sessions: 32,
            max_per_address: 3,
            verify_names: false,
            salt: String::new(),
            use_allowlist: false,
            operators: Vec::new(),
            extensions: true,
            connection_timeout_secs: 25,
            world: WorldConfig::default(),
            throttle: ThrottleConfig::default(),
            anticheat: AntiCheatConfig::default(),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 64,
            length: 128,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            block_packets_per_second: 200,
        }
    }
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            normal: Thresholds::default(),
            operator: Thresholds {
                max_horizontal_delta_sq: 100.0,
                max_jump: 16.0,
                movement_packets: 200,
                block_reach: 64.0,
                block_packets: 400,
                chat_messages: 20,
                ..Thresholds::default()
            },
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_horizontal_delta_sq: 9.0,
            max_jump: 2.0,
            movement_packets: 60,
            movement_interval_ms: 1000,
            block_reach: 12.0,
            block_packets: 47,
            block_interval_secs: 6,
            chat_messages: 5,
            chat_interval_secs: 5,
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// The salt used for name verification, deriving a per-process one
    /// when the config leaves it empty.
    pub fn effective_salt(&self) -> String {
        if !self.salt.is_empty() {
            return self.salt.clone();
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u128 + d.as_secs() as u128)
            .unwrap_or(0);
        hex::encode(Md5::digest(nanos.to_be_bytes()))
    }

    pub fn is_operator(&self, name: &str) -> bool {
        self.operators.iter().any(|op| op.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.anticheat.normal.block_packets, 47);
        assert_eq!(cfg.anticheat.normal.block_interval_secs, 6);
        assert!(cfg.anticheat.operator.block_packets > cfg.anticheat.normal.block_packets);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            name = "Test"
            [throttle]
            block_packets_per_second = 25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.name, "Test");
        assert_eq!(cfg.throttle.block_packets_per_second, 25);
        assert_eq!(cfg.max_sessions, 32);
    }

    #[test]
    fn empty_salt_derives_one() {
        let cfg = Config::default();
        assert_eq!(cfg.effective_salt().len(), 32);
    }
}
