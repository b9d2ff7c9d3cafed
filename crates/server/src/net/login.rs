//! Login negotiation: handshake, name validation, access lists,
//! optional capability-extension exchange, registration, and the
//! compressed world transfer.
//!
//! AwaitingHandshake -> ValidatingName -> CheckingAccessLists
//!   -> NegotiatingExtensions (optional) -> Registering
//!   -> TransmittingWorld -> Established

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use cobalt_protocol::{EXTENSION_MAGIC, LEVEL_CHUNK_LEN, PROTOCOL_VERSION, Packet, Position,
    read_packet};
use indexmap::IndexMap;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::ServerState;
use crate::block;
use crate::net::session::{CapabilitySet, SELF_ID, SessionShared};

/// Negotiation step, recorded in rejection logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Handshake,
    NameValidation,
    AccessLists,
    Extensions,
    Registration,
    WorldTransfer,
}

/// Terminal failure: the session is kicked with `reason` and no
/// further login states are entered.
#[derive(Debug)]
pub struct Rejection {
    pub step: LoginStep,
    pub reason: String,
}

impl Rejection {
    fn new(step: LoginStep, reason: impl Into<String>) -> Self {
        Self { step, reason: reason.into() }
    }
}

/// A fully negotiated session, ready for the steady-state loop.
pub struct Established {
    pub shared: Arc<SessionShared>,
    pub exit_tx: oneshot::Sender<()>,
    pub spawn: Position,
}

/// Extensions this server understands, in announcement order.
fn supported_extensions() -> IndexMap<&'static str, u32> {
    IndexMap::from([
        ("CustomBlocks", 1),
        ("BlockPermissions", 1),
        ("TwoWayPing", 1),
    ])
}

/// Expected verification token: hex MD5 of salt + name, compared
/// case-insensitively against what the client sent.
fn expected_token(salt: &str, name: &str) -> String {
    hex::encode(Md5::digest(format!("{salt}{name}")))
}

fn valid_name(name: &str) -> bool {
    (2..=16).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Drive the whole login exchange. `Err` is a transport/internal
/// failure; `Ok(Err(_))` is a policy or protocol rejection the caller
/// turns into a kick packet.
pub async fn negotiate<R, W>(
    read: &mut R,
    write: &mut W,
    addr: IpAddr,
    state: &Arc<ServerState>,
) -> Result<std::result::Result<Established, Rejection>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    // -- AwaitingHandshake --
    let packet = match read_packet(read).await {
        Ok(p) => p,
        Err(e) if e.is_transport() => return Err(e).context("reading handshake"),
        Err(e) => {
            tracing::info!("{} sent garbage before handshake: {}", addr, e);
            return Ok(Err(Rejection::new(LoginStep::Handshake, "Unexpected packet")));
        }
    };
    let Packet::Identification { version, name, detail: token, pad } = packet else {
        return Ok(Err(Rejection::new(LoginStep::Handshake, "Expected a handshake")));
    };
    if version != PROTOCOL_VERSION {
        return Ok(Err(Rejection::new(
            LoginStep::Handshake,
            format!("Incompatible protocol version {version}"),
        )));
    }

    // -- ValidatingName --
    if !valid_name(&name) {
        return Ok(Err(Rejection::new(LoginStep::NameValidation, "Invalid player name")));
    }
    if state.config.verify_names
        && !expected_token(&state.salt, &name).eq_ignore_ascii_case(token.trim())
    {
        return Ok(Err(Rejection::new(
            LoginStep::NameValidation,
            "Name verification failed",
        )));
    }

    // -- CheckingAccessLists --
    if state.access.is_name_banned(&name) {
        return Ok(Err(Rejection::new(LoginStep::AccessLists, "You are banned")));
    }
    if state.access.is_address_banned(addr) {
        return Ok(Err(Rejection::new(LoginStep::AccessLists, "Your address is banned")));
    }
    if state.config.use_allowlist && !state.access.is_allowed(&name) {
        return Ok(Err(Rejection::new(
            LoginStep::AccessLists,
            "You are not on the allow-list",
        )));
    }

    // -- NegotiatingExtensions (optional) --
    let caps = if state.config.extensions && pad == EXTENSION_MAGIC {
        match exchange_extensions(read, write, &state.config.name).await? {
            Ok(caps) => caps,
            Err(rejection) => return Ok(Err(rejection)),
        }
    } else {
        CapabilitySet::default()
    };

    // -- Registering --
    let operator = state.config.is_operator(&name);
    let spawn = state.world.spawn();
    let (shared, exit_tx) = SessionShared::new(name, addr, operator, caps, spawn);
    if let Err(refusal) = state.registry.register(&shared).await {
        return Ok(Err(Rejection::new(LoginStep::Registration, refusal.reason())));
    }

    // -- TransmittingWorld --
    // From here on the session is registered: any failure must undo
    // that and fire the exit signal before propagating.
    match transmit_world_and_spawn(write, &shared, spawn, state).await {
        Ok(()) => Ok(Ok(Established { shared, exit_tx, spawn })),
        Err(e) => {
            state.registry.unregister(&shared);
            let _ = exit_tx.send(());
            Err(e).context("transmitting world")
        }
    }
}

/// Capability-negotiation sub-protocol: both sides announce their
/// extension tables; unknown entries are silently ignored. Any
/// unexpected opcode mid-exchange rejects the login.
async fn exchange_extensions<R, W>(
    read: &mut R,
    write: &mut W,
    server_name: &str,
) -> Result<std::result::Result<CapabilitySet, Rejection>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let table = supported_extensions();

    write
        .write_all(
            &Packet::ExtInfo {
                app_name: server_name.into(),
                count: table.len() as u16,
            }
            .encode(),
        )
        .await?;
    for (ext, version) in &table {
        write
            .write_all(&Packet::ExtEntry { name: (*ext).into(), version: *version }.encode())
            .await?;
    }
    write.flush().await?;

    let client_count = match read_packet(read).await {
        Ok(Packet::ExtInfo { count, .. }) => count,
        Ok(other) => {
            tracing::info!("expected ExtInfo, got {:?}", other.opcode());
            return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
        }
        Err(e) if e.is_transport() => return Err(e).context("reading ExtInfo"),
        Err(_) => {
            return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
        }
    };

    let mut caps = CapabilitySet::default();
    let mut wants_custom_blocks = false;
    for _ in 0..client_count {
        let (ext_name, ext_version) = match read_packet(read).await {
            Ok(Packet::ExtEntry { name, version }) => (name, version),
            Ok(other) => {
                tracing::info!("expected ExtEntry, got {:?}", other.opcode());
                return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
            }
            Err(e) if e.is_transport() => return Err(e).context("reading ExtEntry"),
            Err(_) => {
                return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
            }
        };
        match table.get(ext_name.as_str()) {
            Some(&version) if version == ext_version => match ext_name.as_str() {
                "CustomBlocks" => wants_custom_blocks = true,
                "BlockPermissions" => caps.block_permissions = true,
                "TwoWayPing" => caps.two_way_ping = true,
                _ => {}
            },
            // Unknown name or version: ignored for forward
            // compatibility.
            _ => {}
        }
    }

    if wants_custom_blocks {
        write
            .write_all(&Packet::CustomBlockSupportLevel { level: block::SUPPORT_LEVEL }.encode())
            .await?;
        write.flush().await?;
        match read_packet(read).await {
            Ok(Packet::CustomBlockSupportLevel { level }) => {
                caps.custom_blocks = true;
                caps.support_level = level.min(block::SUPPORT_LEVEL);
            }
            Ok(other) => {
                tracing::info!("expected support level, got {:?}", other.opcode());
                return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
            }
            Err(e) if e.is_transport() => return Err(e).context("reading support level"),
            Err(_) => {
                return Ok(Err(Rejection::new(LoginStep::Extensions, "Malformed negotiation")));
            }
        }
    }

    Ok(Ok(caps))
}

/// Handshake ack, compressed world stream, spawn packets, and the join
/// announcements.
async fn transmit_world_and_spawn<W>(
    write: &mut W,
    shared: &Arc<SessionShared>,
    spawn: Position,
    state: &Arc<ServerState>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let user_type = if shared.operator { 0x64 } else { 0x00 };
    write
        .write_all(
            &Packet::Identification {
                version: PROTOCOL_VERSION,
                name: state.config.name.clone(),
                detail: state.config.motd.clone(),
                pad: user_type,
            }
            .encode(),
        )
        .await?;

    write.write_all(&Packet::LevelInitialize.encode()).await?;
    let stream = state.world.snapshot_gzip(shared.caps.custom_blocks)?;
    let total = stream.chunks(LEVEL_CHUNK_LEN).count().max(1);
    for (n, chunk) in stream.chunks(LEVEL_CHUNK_LEN).enumerate() {
        let percent = ((n + 1) * 100 / total) as u8;
        write
            .write_all(&Packet::level_chunk(chunk, percent).encode())
            .await?;
    }
    let (width, height, length) = state.world.dimensions();
    write
        .write_all(&Packet::LevelFinalize { width, height, length }.encode())
        .await?;

    if shared.caps.block_permissions {
        for b in 0..=block::CUSTOM_CEILING {
            if block::is_protected(b) {
                write
                    .write_all(
                        &Packet::BlockPermission {
                            block: b,
                            allow_place: shared.operator,
                            allow_delete: shared.operator,
                        }
                        .encode(),
                    )
                    .await?;
            }
        }
    }

    write
        .write_all(
            &Packet::SpawnEntity {
                id: SELF_ID,
                name: shared.name.clone(),
                pos: spawn,
            }
            .encode(),
        )
        .await?;
    write
        .write_all(&Packet::Teleport { id: SELF_ID, pos: spawn }.encode())
        .await?;
    if shared.operator {
        write
            .write_all(&Packet::UserType { user_type }.encode())
            .await?;
    }
    write.flush().await?;

    // Mutual visibility: existing sessions spawn on the newcomer's
    // queue; the newcomer spawns on theirs.
    for other in state.registry.snapshot() {
        if std::ptr::eq(Arc::as_ptr(&other), Arc::as_ptr(shared)) {
            continue;
        }
        shared.enqueue(Packet::SpawnEntity {
            id: other.id(),
            name: other.name.clone(),
            pos: other.position(),
        });
        other.enqueue(Packet::SpawnEntity {
            id: shared.id(),
            name: shared.name.clone(),
            pos: spawn,
        });
    }
    state
        .registry
        .broadcast_message(SELF_ID, &format!("&e{} joined the game", shared.name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_policy() {
        assert!(valid_name("Bob"));
        assert!(valid_name("a_b.c99"));
        assert!(!valid_name("x"));
        assert!(!valid_name("seventeen_chars__"));
        assert!(!valid_name("bad name"));
        assert!(!valid_name("curse<d>"));
    }

    #[test]
    fn token_is_salted_md5_hex() {
        let token = expected_token("salt", "Bob");
        assert_eq!(token.len(), 32);
        assert_eq!(token, expected_token("salt", "Bob"));
        assert_ne!(token, expected_token("other", "Bob"));
        // Case-insensitive comparison is the caller's job; the token
        // itself is lowercase hex.
        assert_eq!(token, token.to_ascii_lowercase());
    }
}
